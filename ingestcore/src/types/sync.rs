use crate::types::address::ServiceAddress;
use crate::types::envelope::DataMessage;
use serde::{Deserialize, Serialize};

/// A message the local user's other devices send to keep this device in sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncMessage {
    pub sent: Option<SentTranscript>,
    pub request: Option<RequestKind>,
    pub read: Vec<ReadMessage>,
    pub view_once_open: Option<ViewOnceOpen>,
    pub verified: Option<VerifiedMessage>,
    pub sticker_pack_operations: Vec<StickerPackOperation>,
    pub configuration: Option<ConfigurationMessage>,
    pub blocked_list: Option<BlockedListMessage>,
    pub fetch_type: Option<FetchKind>,
    pub message_request_response: Option<MessageRequestResponse>,
    pub outgoing_payment: Option<OutgoingPayment>,
}

/// A copy of a message this account sent from another device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentTranscript {
    pub destination: Option<ServiceAddress>,
    pub timestamp: u64,
    pub message: DataMessage,
    pub expiration_start_timestamp: u64,
    pub unidentified_status: Vec<UnidentifiedStatus>,
    pub is_recipient_update: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnidentifiedStatus {
    pub address: ServiceAddress,
    pub unidentified: bool,
}

impl SentTranscript {
    pub fn recipients(&self) -> impl Iterator<Item = &ServiceAddress> {
        self.unidentified_status.iter().map(|s| &s.address)
    }

    /// Whether the copy to `identifier` went out sealed-sender.
    pub fn is_unidentified(&self, identifier: &str) -> bool {
        self.unidentified_status
            .iter()
            .any(|s| s.unidentified && s.address.has_identifier(identifier))
    }

    /// True when either of the address's identifiers was sent sealed-sender.
    pub fn is_unidentified_address(&self, address: &ServiceAddress) -> bool {
        let by_e164 = address.e164.as_deref().is_some_and(|e| self.is_unidentified(e));
        let by_uuid = address.uuid.as_deref().is_some_and(|u| self.is_unidentified(u));
        by_e164 || by_uuid
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Unknown,
    Contacts,
    Groups,
    Blocked,
    Configuration,
    Keys,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadMessage {
    pub sender: ServiceAddress,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewOnceOpen {
    pub sender: ServiceAddress,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifiedState {
    #[default]
    Default,
    Verified,
    Unverified,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifiedMessage {
    pub destination: ServiceAddress,
    pub identity_key: Vec<u8>,
    pub state: VerifiedState,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickerPackOperationKind {
    Install,
    Remove,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerPackOperation {
    pub pack_id: Option<Vec<u8>>,
    pub pack_key: Option<Vec<u8>>,
    pub kind: Option<StickerPackOperationKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationMessage {
    pub read_receipts: Option<bool>,
    pub unidentified_delivery_indicators: Option<bool>,
    pub typing_indicators: Option<bool>,
    pub link_previews: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockedListMessage {
    pub addresses: Vec<ServiceAddress>,
    pub group_ids: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    #[default]
    Unknown,
    LocalProfile,
    StorageManifest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRequestResponseKind {
    #[default]
    Unknown,
    Accept,
    Delete,
    Block,
    BlockAndDelete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRequestResponse {
    pub person: Option<ServiceAddress>,
    pub group_id: Option<Vec<u8>>,
    pub kind: MessageRequestResponseKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutgoingPayment {
    pub recipient: Option<String>,
    pub address: Option<Vec<u8>>,
    pub note: Option<String>,
    pub amount_picomob: u64,
    pub fee_picomob: u64,
    pub receipt: Vec<u8>,
    pub block_index: u64,
    pub block_timestamp: u64,
    pub public_keys: Vec<Vec<u8>>,
    pub key_images: Vec<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unidentified_is_true_when_either_identifier_matches() {
        let transcript = SentTranscript {
            unidentified_status: vec![
                UnidentifiedStatus {
                    address: ServiceAddress::from_e164("+1555"),
                    unidentified: true,
                },
                UnidentifiedStatus {
                    address: ServiceAddress::from_uuid("u-2"),
                    unidentified: false,
                },
            ],
            ..Default::default()
        };
        assert!(transcript.is_unidentified_address(&ServiceAddress::new("u-1", "+1555")));
        assert!(!transcript.is_unidentified_address(&ServiceAddress::from_uuid("u-2")));
        assert!(!transcript.is_unidentified_address(&ServiceAddress::from_uuid("u-3")));
    }
}
