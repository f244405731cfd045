use thiserror::Error;

use crate::transport::config::ConfigError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Close error: {0}")]
    Close(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure reported by a server-side call handler.
///
/// Both plain strings and `std::error::Error` values reduce to a message,
/// which is what travels to the client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Reduce any error value to its display message
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(error.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<Error> for HandlerError {
    fn from(error: Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Per-call failure observed by a client.
///
/// `Display` renders the same plain string the wire protocol hands to
/// callers: remote messages and raw bodies verbatim, timeouts as
/// `Timeout of <ms>ms exceeded`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Connection or request failure below the protocol
    #[error("{0}")]
    Transport(String),

    /// The remote handler reported failure
    #[error("{0}")]
    Remote(String),

    /// The response body was not a valid reply; carries the raw body
    #[error("{0}")]
    Malformed(String),

    /// No response within the configured deadline
    #[error("Timeout of {0}ms exceeded")]
    Timeout(u128),
}

impl CallError {
    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }
}

/// A call callback panicked
///
/// Reported once through the client's fault hook; the call itself is
/// already settled when this is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("callback for {method:?} panicked: {message}")]
pub struct CallbackFault {
    pub method: String,
    pub message: String,
}
