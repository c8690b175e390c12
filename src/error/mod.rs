use ingestcore::store::StoreError;
use ingestcore::types::{DecryptedEnvelope, FailureMetadata, GroupContextError, GroupId, ServiceAddress};
use thiserror::Error;

/// The only failure that leaves the pipeline. The message's writes were
/// rolled back; callers typically re-feed it through the failure path.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("storage failure applying message from {sender}.{sender_device}: {source}")]
    StorageFailure {
        sender: ServiceAddress,
        sender_device: u32,
        group_id: Option<GroupId>,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub(crate) fn for_envelope(envelope: &DecryptedEnvelope, source: StoreError) -> Self {
        IngestError::StorageFailure {
            sender: envelope.sender.clone(),
            sender_device: envelope.sender_device,
            group_id: envelope.group_context().and_then(|ctx| ctx.group_id().ok()),
            source,
        }
    }

    pub(crate) fn for_failure(meta: &FailureMetadata, source: StoreError) -> Self {
        IngestError::StorageFailure {
            sender: meta.sender.clone(),
            sender_device: meta.sender_device,
            group_id: meta.group_id.clone(),
            source,
        }
    }

    /// Sender metadata to build a `CorruptMessage` retry from.
    pub fn failure_metadata(&self) -> FailureMetadata {
        match self {
            IngestError::StorageFailure {
                sender,
                sender_device,
                group_id,
                ..
            } => FailureMetadata {
                sender: sender.clone(),
                sender_device: *sender_device,
                group_id: group_id.clone(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("local user is not a member of the group")]
    NotAMember,
    #[error("group state fetch was cancelled")]
    Cancelled,
    #[error("group service is busy")]
    Busy,
    #[error("invalid group context: {0}")]
    Context(#[from] GroupContextError),
    #[error("group service error: {0}")]
    Service(#[from] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
