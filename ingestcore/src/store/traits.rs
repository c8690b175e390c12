use crate::store::error::Result;
use crate::store::records::*;
use crate::types::address::{MessageId, RecipientId, ServiceAddress, ThreadId};
use crate::types::group::GroupId;
use crate::types::receipt::ReceiptKind;
use crate::types::sync::VerifiedState;
use async_trait::async_trait;

#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// The local account. Backends must be provisioned with it.
    async fn self_id(&self) -> Result<RecipientId>;
    async fn find_recipient(&self, address: &ServiceAddress) -> Result<Option<RecipientRecord>>;
    async fn recipient(&self, id: RecipientId) -> Result<RecipientRecord>;
    async fn get_or_create_recipient(&mut self, address: &ServiceAddress) -> Result<RecipientId>;
    async fn get_or_create_group_recipient(&mut self, group_id: &GroupId) -> Result<RecipientId>;
    /// Returns whether the stored key changed.
    async fn set_profile_key(&mut self, id: RecipientId, key: &[u8]) -> Result<bool>;
    async fn set_profile_sharing(&mut self, id: RecipientId, enabled: bool) -> Result<()>;
    async fn set_blocked(&mut self, id: RecipientId, blocked: bool) -> Result<()>;
    async fn set_expire_messages(&mut self, id: RecipientId, seconds: u32) -> Result<()>;
    async fn mark_registered(&mut self, id: RecipientId) -> Result<()>;
    /// Replace the block list: everything listed becomes blocked, everything else unblocked.
    async fn apply_blocked_list(&mut self, addresses: &[ServiceAddress], groups: &[GroupId]) -> Result<()>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn thread_for_recipient(&self, recipient: RecipientId) -> Result<Option<ThreadId>>;
    async fn get_or_create_thread(&mut self, recipient: RecipientId) -> Result<ThreadId>;
    async fn thread(&self, id: ThreadId) -> Result<ThreadRecord>;
    async fn set_thread_read(&mut self, id: ThreadId) -> Result<()>;
    /// Mark every unread incoming message in the thread sent at or before `since` as read.
    async fn set_read_since(&mut self, id: ThreadId, since: u64) -> Result<Vec<MarkedRead>>;
    async fn delete_conversation(&mut self, id: ThreadId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptUpdate {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub changed: bool,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Returns `None` when a row of the same class already exists for the
    /// author, sent timestamp and conversation.
    async fn insert_incoming(&mut self, message: IncomingMessage) -> Result<Option<InsertResult>>;
    async fn insert_outgoing(&mut self, message: OutgoingMessage) -> Result<Option<InsertResult>>;
    async fn message(&self, id: MessageId) -> Result<Option<MessageRecord>>;
    /// Content rows only; update rows are never targets.
    async fn message_for(&self, key: MessageKey) -> Result<Option<MessageRecord>>;
    /// Turn a placeholder into a text row keyed by the real sent timestamp.
    async fn update_body(&mut self, id: MessageId, sent_timestamp: u64, body: &str) -> Result<ThreadId>;
    async fn mark_failure(&mut self, id: MessageId, marker: FailureMarker) -> Result<ThreadId>;
    async fn mark_end_session(&mut self, id: MessageId, sent_timestamp: u64) -> Result<ThreadId>;
    async fn mark_missed_call(&mut self, id: MessageId, video: bool) -> Result<ThreadId>;
    async fn mark_remote_deleted(&mut self, id: MessageId) -> Result<()>;
    async fn mark_sent(&mut self, id: MessageId) -> Result<()>;
    async fn mark_unidentified(&mut self, id: MessageId, unidentified: bool) -> Result<()>;
    async fn mark_expire_started(&mut self, id: MessageId, started_at: u64) -> Result<()>;
    async fn delete_message(&mut self, id: MessageId) -> Result<()>;
    /// Drop attachment data of a view-once message, keeping the row.
    async fn delete_view_once_content(&mut self, id: MessageId) -> Result<()>;
    /// Insert or replace the author's reaction. Returns whether anything changed.
    async fn add_reaction(&mut self, id: MessageId, reaction: ReactionRecord) -> Result<bool>;
    async fn remove_reaction(&mut self, id: MessageId, author: RecipientId) -> Result<bool>;
    async fn add_receipt(
        &mut self,
        key: MessageKey,
        kind: ReceiptKind,
        from: RecipientId,
    ) -> Result<Option<ReceiptUpdate>>;
    async fn mark_read_by_sync(&mut self, key: MessageKey) -> Result<Option<MarkedRead>>;
    /// One row per (conversation, era); later updates only bump the timestamps.
    async fn upsert_group_call(
        &mut self,
        conversation: RecipientId,
        sender: RecipientId,
        sent_timestamp: u64,
        server_timestamp: u64,
        era_id: Option<String>,
    ) -> Result<(MessageId, ThreadId)>;
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>>;
    async fn put_group(&mut self, record: GroupRecord) -> Result<()>;
    /// The V1 group whose migration id is `v2`, if it has not been migrated yet.
    async fn group_v1_by_expected_v2(&self, v2: &GroupId) -> Result<Option<GroupRecord>>;
    /// Re-key a V1 group (and its recipient) under its V2 id.
    async fn migrate_group(&mut self, v1: &GroupId, v2: &GroupId, master_key: &[u8]) -> Result<()>;
}

#[async_trait]
pub trait GroupReceiptStore: Send + Sync {
    async fn group_receipts(&self, message: MessageId) -> Result<Vec<GroupReceiptInfo>>;
    async fn insert_group_receipts(
        &mut self,
        message: MessageId,
        recipients: &[RecipientId],
        status: GroupReceiptStatus,
        timestamp: u64,
    ) -> Result<()>;
    async fn update_group_receipt(
        &mut self,
        message: MessageId,
        recipient: RecipientId,
        status: GroupReceiptStatus,
        timestamp: u64,
    ) -> Result<()>;
    async fn set_group_receipts_unidentified(
        &mut self,
        message: MessageId,
        statuses: &[(RecipientId, bool)],
    ) -> Result<()>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn identity(&self, recipient: RecipientId) -> Result<Option<IdentityRecord>>;
    async fn set_verified(
        &mut self,
        recipient: RecipientId,
        identity_key: &[u8],
        state: VerifiedState,
    ) -> Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn has_session(&self, address: &ServiceAddress, device: u32) -> Result<bool>;
    async fn put_session(&mut self, address: &ServiceAddress, device: u32) -> Result<()>;
    async fn delete_all_sessions(&mut self, address: &ServiceAddress) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Returns false if a payment with the same id already exists.
    async fn insert_payment(&mut self, record: PaymentRecord) -> Result<bool>;
    async fn payments(&self) -> Result<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait StickerStore: Send + Sync {
    async fn sticker(&self, pack_id: &str, sticker_id: u32) -> Result<Option<StickerRecord>>;
    async fn put_sticker(&mut self, sticker: StickerRecord) -> Result<()>;
    async fn uninstall_pack(&mut self, pack_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self) -> Result<Settings>;
    async fn put_settings(&mut self, settings: Settings) -> Result<()>;
}

/// A unit of work over every store. Dropping without `commit` discards all writes.
#[async_trait]
pub trait Transaction:
    RecipientStore
    + ThreadStore
    + MessageStore
    + GroupStore
    + GroupReceiptStore
    + IdentityStore
    + SessionStore
    + PaymentStore
    + StickerStore
    + SettingsStore
    + Send
    + Sync
{
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
