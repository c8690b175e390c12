use crate::types::address::ServiceAddress;
use crate::types::call::CallMessage;
use crate::types::group::{GroupContext, GroupContextV1, GroupId, GroupV1Kind};
use crate::types::receipt::{ReceiptMessage, TypingMessage};
use crate::types::sync::SyncMessage;
use serde::{Deserialize, Serialize};

/// A successfully decrypted envelope together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptedEnvelope {
    pub sender: ServiceAddress,
    #[serde(default = "default_device")]
    pub sender_device: u32,
    /// Sender-assigned send time, milliseconds.
    pub timestamp: u64,
    #[serde(default)]
    pub server_received_timestamp: u64,
    #[serde(default)]
    pub server_delivered_timestamp: u64,
    #[serde(default)]
    pub needs_receipt: bool,
    /// Delivered with sealed sender.
    #[serde(default)]
    pub unidentified: bool,
    pub content: Content,
}

fn default_device() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Data(DataMessage),
    Sync(SyncMessage),
    Call(CallMessage),
    Receipt(ReceiptMessage),
    Typing(TypingMessage),
}

impl DecryptedEnvelope {
    pub fn data_message(&self) -> Option<&DataMessage> {
        match &self.content {
            Content::Data(msg) => Some(msg),
            _ => None,
        }
    }

    /// The group context carried by the payload, if any. For sync transcripts this
    /// is the context of the transcribed message.
    pub fn group_context(&self) -> Option<&GroupContext> {
        match &self.content {
            Content::Data(msg) => msg.group.as_ref(),
            Content::Sync(sync) => sync.sent.as_ref().and_then(|s| s.message.group.as_ref()),
            _ => None,
        }
    }

    pub fn content_kind(&self) -> &'static str {
        match &self.content {
            Content::Data(_) => "data",
            Content::Sync(_) => "sync",
            Content::Call(_) => "call",
            Content::Receipt(_) => "receipt",
            Content::Typing(_) => "typing",
        }
    }
}

/// The user-visible payload of a message. Every part is optional; which parts
/// are present decides how the message is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMessage {
    pub body: Option<String>,
    pub group: Option<GroupContext>,
    pub attachments: Vec<AttachmentPointer>,
    pub quote: Option<Quote>,
    pub shared_contacts: Vec<SharedContact>,
    pub previews: Vec<Preview>,
    pub mentions: Vec<Mention>,
    pub sticker: Option<Sticker>,
    pub reaction: Option<Reaction>,
    pub remote_delete: Option<RemoteDelete>,
    pub payment: Option<Payment>,
    pub group_call_update: Option<GroupCallUpdate>,
    pub profile_key: Option<Vec<u8>>,
    pub expires_in_seconds: u32,
    pub expiration_update: bool,
    pub end_session: bool,
    pub view_once: bool,
}

impl DataMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    pub fn group_v1(&self) -> Option<&GroupContextV1> {
        match &self.group {
            Some(GroupContext::V1(ctx)) => Some(ctx),
            _ => None,
        }
    }

    pub fn group_id(&self) -> Option<Result<GroupId, crate::types::group::GroupContextError>> {
        self.group.as_ref().map(GroupContext::group_id)
    }

    pub fn is_group_v1_update(&self) -> bool {
        self.group_v1().is_some_and(|ctx| ctx.kind != GroupV1Kind::Deliver)
    }

    pub fn is_group_v2_message(&self) -> bool {
        matches!(self.group, Some(GroupContext::V2(_)))
    }

    pub fn is_group_v2_update(&self) -> bool {
        match &self.group {
            Some(GroupContext::V2(ctx)) => ctx.signed_change.is_some() && !self.has_renderable_content(),
            _ => false,
        }
    }

    pub fn is_empty_group_v2_message(&self) -> bool {
        match &self.group {
            Some(GroupContext::V2(ctx)) => ctx.signed_change.is_none() && !self.has_renderable_content(),
            _ => false,
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.is_empty())
    }

    pub fn is_media(&self) -> bool {
        !self.attachments.is_empty()
            || self.quote.is_some()
            || !self.shared_contacts.is_empty()
            || !self.previews.is_empty()
            || self.sticker.is_some()
            || !self.mentions.is_empty()
    }

    pub fn has_renderable_content(&self) -> bool {
        self.has_body()
            || self.is_media()
            || self.reaction.is_some()
            || self.remote_delete.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentPointer {
    /// CDN locator of the encrypted blob.
    pub remote_id: String,
    pub cdn_number: u32,
    pub content_type: String,
    pub key: Vec<u8>,
    pub digest: Option<Vec<u8>>,
    pub size: Option<u64>,
    pub file_name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub caption: Option<String>,
    pub blur_hash: Option<String>,
    pub voice_note: bool,
    pub borderless: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Quote {
    pub id: u64,
    pub author: ServiceAddress,
    pub text: Option<String>,
    pub attachments: Vec<QuotedAttachment>,
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotedAttachment {
    pub content_type: String,
    pub file_name: Option<String>,
    pub thumbnail: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedContact {
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub phone_numbers: Vec<String>,
    pub emails: Vec<String>,
    pub organization: Option<String>,
    pub avatar: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: u64,
    pub image: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub uuid: String,
    pub start: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sticker {
    pub pack_id: Option<Vec<u8>>,
    pub pack_key: Option<Vec<u8>>,
    pub sticker_id: u32,
    pub emoji: Option<String>,
    pub attachment: Option<AttachmentPointer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    #[serde(default)]
    pub remove: bool,
    pub target_author: ServiceAddress,
    pub target_sent_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDelete {
    pub target_sent_timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub notification: Option<PaymentNotification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentNotification {
    pub receipt: Vec<u8>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupCallUpdate {
    pub era_id: Option<String>,
}
