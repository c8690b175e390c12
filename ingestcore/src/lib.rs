pub mod calls;
pub mod classify;
pub mod download;
pub mod emoji;
pub mod jobs;
pub mod links;
pub mod mime;
pub mod proto;
pub mod remote_delete;
pub mod store;
pub mod types;
