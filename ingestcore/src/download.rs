use crate::types::address::{AttachmentId, MessageId};
use async_trait::async_trait;

/// Fetches an attachment's bytes and records the result in storage.
#[async_trait]
pub trait AttachmentDownloader: Send + Sync {
    async fn download(&self, message_id: MessageId, attachment_id: AttachmentId) -> anyhow::Result<()>;
}
