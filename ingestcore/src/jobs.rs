use crate::types::address::{AttachmentId, MessageId, RecipientId, ThreadId};
use crate::types::group::GroupId;
use serde::Serialize;

/// Deferred work requested by message handling. Jobs are fire-and-forget
/// from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    AttachmentDownload {
        message_id: MessageId,
        attachment_id: AttachmentId,
        forced: bool,
    },
    RetrieveProfile {
        recipient: RecipientId,
    },
    RefreshOwnProfile,
    RequestGroupInfo {
        source: RecipientId,
        group_id: GroupId,
    },
    PushGroupUpdate {
        destination: RecipientId,
        group_id: GroupId,
    },
    AutomaticSessionReset {
        recipient: RecipientId,
        device: u32,
        sent_timestamp: u64,
    },
    SendDeliveryReceipt {
        recipient: RecipientId,
        message_sent_timestamp: u64,
    },
    SendReadReceipts {
        recipient: RecipientId,
        message_sent_timestamps: Vec<u64>,
    },
    StickerPackDownload {
        pack_id: String,
        pack_key: String,
        install: bool,
    },
    TrimThread {
        thread: ThreadId,
    },
    GroupCallPeek {
        group_recipient: RecipientId,
    },
    PaymentTransactionCheck {
        payment_id: String,
        queue: String,
    },
    PaymentLedgerUpdate,
    ScheduleExpiration {
        message_id: MessageId,
        started_at: u64,
        expires_in_ms: u64,
    },
    ViewOnceCleanup,
    MultiDeviceContactUpdate,
    MultiDeviceGroupUpdate,
    MultiDeviceBlockedUpdate,
    MultiDeviceKeysUpdate,
    MultiDeviceStickerPackSync,
    MultiDeviceConfigurationUpdate {
        read_receipts: bool,
        typing_indicators: bool,
        unidentified_delivery_indicators: bool,
        link_previews: bool,
    },
    StorageSync,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::AttachmentDownload { .. } => "attachment_download",
            Job::RetrieveProfile { .. } => "retrieve_profile",
            Job::RefreshOwnProfile => "refresh_own_profile",
            Job::RequestGroupInfo { .. } => "request_group_info",
            Job::PushGroupUpdate { .. } => "push_group_update",
            Job::AutomaticSessionReset { .. } => "automatic_session_reset",
            Job::SendDeliveryReceipt { .. } => "send_delivery_receipt",
            Job::SendReadReceipts { .. } => "send_read_receipts",
            Job::StickerPackDownload { .. } => "sticker_pack_download",
            Job::TrimThread { .. } => "trim_thread",
            Job::GroupCallPeek { .. } => "group_call_peek",
            Job::PaymentTransactionCheck { .. } => "payment_transaction_check",
            Job::PaymentLedgerUpdate => "payment_ledger_update",
            Job::ScheduleExpiration { .. } => "schedule_expiration",
            Job::ViewOnceCleanup => "view_once_cleanup",
            Job::MultiDeviceContactUpdate => "multi_device_contact_update",
            Job::MultiDeviceGroupUpdate => "multi_device_group_update",
            Job::MultiDeviceBlockedUpdate => "multi_device_blocked_update",
            Job::MultiDeviceKeysUpdate => "multi_device_keys_update",
            Job::MultiDeviceStickerPackSync => "multi_device_sticker_pack_sync",
            Job::MultiDeviceConfigurationUpdate { .. } => "multi_device_configuration_update",
            Job::StorageSync => "storage_sync",
        }
    }
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job);
}
