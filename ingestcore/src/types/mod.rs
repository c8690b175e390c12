pub mod address;
pub mod call;
pub mod envelope;
pub mod group;
pub mod receipt;
pub mod state;
pub mod sync;

pub use address::{AttachmentId, MessageId, RecipientId, ServiceAddress, ThreadId};
pub use envelope::{Content, DataMessage, DecryptedEnvelope};
pub use group::{GroupContext, GroupContextError, GroupId};
pub use state::{FailureMetadata, MessageState};
