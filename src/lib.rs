pub mod error;
pub mod protocol;
pub mod transport;

pub use error::{CallError, CallbackFault, Error, HandlerError};
pub use protocol::*;
pub use transport::*;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;
