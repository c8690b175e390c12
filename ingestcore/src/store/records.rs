use crate::types::address::{AttachmentId, MessageId, RecipientId, ServiceAddress, ThreadId};
use crate::types::envelope::{AttachmentPointer, Preview, QuotedAttachment, SharedContact};
use crate::types::group::{DecryptedGroup, EncodedGroupContext, GroupId};
use crate::types::sync::VerifiedState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifies a message by who wrote it and when they sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub author: RecipientId,
    pub timestamp: u64,
}

impl MessageKey {
    pub fn new(author: RecipientId, timestamp: u64) -> Self {
        Self { author, timestamp }
    }
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.author, self.timestamp)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub id: RecipientId,
    pub address: Option<ServiceAddress>,
    pub group_id: Option<GroupId>,
    pub blocked: bool,
    pub profile_key: Option<Vec<u8>>,
    pub profile_sharing: bool,
    pub system_contact: bool,
    pub expire_messages_seconds: u32,
    pub registered: bool,
}

impl RecipientRecord {
    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }

    pub fn is_self(&self, self_id: RecipientId) -> bool {
        self.id == self_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub recipient: RecipientId,
    pub unread_count: u32,
    pub last_seen: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Media,
    /// Stand-in row for a message that could not be decrypted or understood.
    Placeholder,
    EndSession,
    ExpirationUpdate,
    GroupUpdate,
    GroupCallUpdate { era_id: Option<String> },
    MissedCall { video: bool },
}

/// Rows of different classes may share an (author, sent time) pair; dedupe and
/// target lookup only consider rows of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DedupeClass {
    Content,
    ExpirationUpdate,
    GroupUpdate,
    GroupCall,
}

impl MessageKind {
    pub fn dedupe_class(&self) -> DedupeClass {
        match self {
            MessageKind::ExpirationUpdate => DedupeClass::ExpirationUpdate,
            MessageKind::GroupUpdate => DedupeClass::GroupUpdate,
            MessageKind::GroupCallUpdate { .. } => DedupeClass::GroupCall,
            _ => DedupeClass::Content,
        }
    }
}

/// Why a placeholder row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureMarker {
    InvalidVersionKeyExchange,
    LegacyVersion,
    UnsupportedProtocolVersion,
    DecryptFailed,
    InvalidMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Pending,
    Started,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerLocator {
    pub pack_id: String,
    pub pack_key: String,
    pub sticker_id: u32,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub pointer: Option<AttachmentPointer>,
    pub content_type: String,
    pub transfer: TransferState,
    pub sticker: Option<StickerLocator>,
    pub local_uri: Option<String>,
    pub quote: bool,
}

impl NewAttachment {
    pub fn from_pointer(pointer: &AttachmentPointer) -> Self {
        Self {
            pointer: Some(pointer.clone()),
            content_type: pointer.content_type.clone(),
            transfer: TransferState::Pending,
            sticker: None,
            local_uri: None,
            quote: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub id: AttachmentId,
    pub message: MessageId,
    pub pointer: Option<AttachmentPointer>,
    pub content_type: String,
    pub transfer: TransferState,
    pub sticker: Option<StickerLocator>,
    pub local_uri: Option<String>,
    pub quote: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub author: RecipientId,
    pub emoji: String,
    pub sent_timestamp: u64,
    pub received_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionRecord {
    pub recipient: RecipientId,
    pub start: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub id: u64,
    pub author: RecipientId,
    pub text: Option<String>,
    /// The quoted message was not found locally.
    pub missing: bool,
    pub attachments: Vec<QuotedAttachment>,
    pub mentions: Vec<MentionRecord>,
}

/// Content shared by inbound and outbound inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub kind: MessageKind,
    pub body: Option<String>,
    pub sent_timestamp: u64,
    pub expires_in_ms: u64,
    pub view_once: bool,
    pub group_context: Option<EncodedGroupContext>,
    pub quote: Option<QuoteRecord>,
    pub shared_contacts: Vec<SharedContact>,
    pub previews: Vec<Preview>,
    pub mentions: Vec<MentionRecord>,
    pub attachments: Vec<NewAttachment>,
}

impl MessageBody {
    pub fn new(kind: MessageKind, sent_timestamp: u64) -> Self {
        Self {
            kind,
            body: None,
            sent_timestamp,
            expires_in_ms: 0,
            view_once: false,
            group_context: None,
            quote: None,
            shared_contacts: Vec::new(),
            previews: Vec::new(),
            mentions: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn expiring_in(mut self, expires_in_ms: u64) -> Self {
        self.expires_in_ms = expires_in_ms;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub author: RecipientId,
    pub author_device: u32,
    /// Conversation the row belongs to: the group recipient or the author.
    pub conversation: RecipientId,
    pub server_timestamp: u64,
    pub received_timestamp: u64,
    pub unidentified: bool,
    pub failure: Option<FailureMarker>,
    pub content: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub conversation: RecipientId,
    pub content: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertResult {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub attachment_ids: Vec<AttachmentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread: ThreadId,
    pub author: RecipientId,
    pub author_device: u32,
    pub direction: Direction,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub sent_timestamp: u64,
    pub server_timestamp: u64,
    pub received_timestamp: u64,
    pub expires_in_ms: u64,
    pub expire_started: u64,
    pub view_once: bool,
    pub failure: Option<FailureMarker>,
    pub remote_deleted: bool,
    pub unidentified: bool,
    pub sent: bool,
    pub read: bool,
    pub group_context: Option<EncodedGroupContext>,
    pub quote: Option<QuoteRecord>,
    pub shared_contacts: Vec<SharedContact>,
    pub previews: Vec<Preview>,
    pub mentions: Vec<MentionRecord>,
    pub attachments: Vec<AttachmentRecord>,
    pub reactions: Vec<ReactionRecord>,
    pub delivery_receipts: BTreeSet<RecipientId>,
    pub read_receipts: BTreeSet<RecipientId>,
    pub viewed_receipts: BTreeSet<RecipientId>,
}

impl MessageRecord {
    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }

    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.author, self.sent_timestamp)
    }

    pub fn delivery_receipt_count(&self) -> usize {
        self.delivery_receipts.len()
    }

    pub fn read_receipt_count(&self) -> usize {
        self.read_receipts.len()
    }

    pub fn viewed_receipt_count(&self) -> usize {
        self.viewed_receipts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkedRead {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub author: RecipientId,
    pub sent_timestamp: u64,
    pub expires_in_ms: u64,
    pub outgoing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub recipient: RecipientId,
    pub title: String,
    pub members: Vec<RecipientId>,
    pub pending_members: Vec<RecipientId>,
    pub active: bool,
    pub master_key: Option<Vec<u8>>,
    /// Latest decrypted V2 state.
    pub decrypted: Option<DecryptedGroup>,
}

impl GroupRecord {
    pub fn is_v2(&self) -> bool {
        self.id.is_v2()
    }

    pub fn revision(&self) -> Option<u32> {
        self.decrypted.as_ref().map(|g| g.revision)
    }

    pub fn is_member(&self, recipient: RecipientId) -> bool {
        self.members.contains(&recipient)
    }

    /// Nothing useful is known about the group beyond the local user.
    pub fn is_placeholder(&self, self_id: RecipientId) -> bool {
        let no_metadata = self.title.is_empty();
        let no_members = self.members.is_empty() || (self.members.len() == 1 && self.members[0] == self_id);
        no_metadata && no_members
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupReceiptStatus {
    Unknown,
    Undelivered,
    Delivered,
    Read,
    Viewed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReceiptInfo {
    pub recipient: RecipientId,
    pub status: GroupReceiptStatus,
    pub timestamp: u64,
    pub unidentified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: Vec<u8>,
    pub verified: VerifiedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentDirection {
    Received,
    Sent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Submitted,
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub direction: PaymentDirection,
    pub state: PaymentState,
    pub peer: RecipientId,
    pub address: Option<Vec<u8>>,
    pub timestamp: u64,
    pub note: Option<String>,
    pub amount_picomob: u64,
    pub fee_picomob: u64,
    pub receipt: Vec<u8>,
    pub block_index: u64,
    pub block_timestamp: u64,
    pub public_keys: Vec<Vec<u8>>,
    pub key_images: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRecord {
    pub pack_id: String,
    pub pack_key: String,
    pub sticker_id: u32,
    pub emoji: Option<String>,
    pub uri: String,
}

/// Per-account preferences that gate how some content is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub read_receipts: bool,
    pub typing_indicators: bool,
    pub unidentified_delivery_indicators: bool,
    pub link_previews: bool,
    pub multi_device: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_receipts: true,
            typing_indicators: true,
            unidentified_delivery_indicators: false,
            link_previews: true,
            multi_device: false,
        }
    }
}
