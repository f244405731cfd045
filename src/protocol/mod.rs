pub mod message;

pub use message::*;

/// Reserved response key marking a handler failure
pub const ERROR_KEY: &str = "$htTransportError";

/// Route path used when none is configured
pub const DEFAULT_PATH: &str = "/ht";
