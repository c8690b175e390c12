pub use ingestcore::download::AttachmentDownloader;

use anyhow::anyhow;
use async_trait::async_trait;
use ingestcore::types::{AttachmentId, MessageId};

/// Never downloads inline, so every attachment goes through the job queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct JobOnlyDownloader;

#[async_trait]
impl AttachmentDownloader for JobOnlyDownloader {
    async fn download(&self, message_id: MessageId, attachment_id: AttachmentId) -> anyhow::Result<()> {
        Err(anyhow!(
            "inline download of attachment {attachment_id} for message {message_id} is not available"
        ))
    }
}
