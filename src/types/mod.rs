pub mod events;

pub use ingestcore::types::*;
