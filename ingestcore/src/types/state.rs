use crate::types::address::ServiceAddress;
use crate::types::group::GroupId;
use serde::{Deserialize, Serialize};

/// Outcome of the decryption stage for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    DecryptedOk,
    Duplicate,
    InvalidVersion,
    CorruptMessage,
    NoSession,
    LegacyMessage,
    UnsupportedDataMessage,
    Noop,
}

impl MessageState {
    pub fn is_failure(self) -> bool {
        !matches!(self, MessageState::DecryptedOk | MessageState::Duplicate | MessageState::Noop)
    }
}

/// Who sent an envelope that could not be decrypted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMetadata {
    pub sender: ServiceAddress,
    #[serde(default = "default_device")]
    pub sender_device: u32,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

fn default_device() -> u32 {
    1
}
