pub mod error;
pub mod records;
pub mod traits;

pub use error::{Result, StoreError};
pub use records::*;
pub use traits::*;
