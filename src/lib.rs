// Core model, classifier and storage traits live in ingestcore
pub use ingestcore::{classify, mime, proto};

pub mod calls;
pub mod config;
pub mod disposition;
pub mod download;
pub mod early_cache;
pub mod error;
pub mod groups;
pub mod jobs;
pub mod processor;
pub mod store;
pub mod types;

mod effects;
mod handlers;

pub use config::{EarlyCachePolicy, IngestConfig};
pub use disposition::{Disposition, DropReason, RejectReason};
pub use error::{GroupError, IngestError};
pub use groups::GroupService;
pub use jobs::{ChannelJobQueue, RecordingJobQueue};
pub use processor::{MessageProcessor, MessageProcessorBuilder};
pub use store::InMemoryBackend;
