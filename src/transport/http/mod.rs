use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;

use crate::HandlerError;

pub mod app;
pub mod client;
pub mod server;
pub mod tls;

/// Server-side call handler
///
/// Invoked once per inbound call. `Ok(None)` answers with no value at all,
/// which the client observes as `Ok(None)` as well.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    /// Handle one call
    async fn handle(&self, method: &str, args: Value) -> Result<Option<Value>, HandlerError>;
}

/// Handler backed by an async closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`CallHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> CallHandler for HandlerFn<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    async fn handle(&self, method: &str, args: Value) -> Result<Option<Value>, HandlerError> {
        (self.f)(method.to_string(), args).await
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// Re-export default implementations
pub use self::app::SharedApp;
pub use self::client::{CallOptions, Client, FaultHook};
pub use self::server::Server;
