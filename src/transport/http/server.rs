use std::{io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use futures::FutureExt;
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{panic_message, tls, CallHandler};
use crate::{
    protocol::{CallEnvelope, Reply},
    transport::config::{Ssl, TransportConfig},
    Error, Result,
};

/// How long `stop` waits for in-flight calls before dropping the listener
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One mounted path and the handler answering it
pub(crate) struct Route {
    path: String,
    handler: Option<Arc<dyn CallHandler>>,
}

impl Route {
    pub(crate) fn new(path: String, handler: Option<Arc<dyn CallHandler>>) -> Self {
        Self { path, handler }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Decode a call, run the handler and encode its reply
    pub(crate) async fn dispatch(&self, body: Bytes) -> Response {
        let CallEnvelope { method, args } = match CallEnvelope::decode(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %self.path, "rejecting malformed call: {}", e);
                return reply_response(StatusCode::BAD_REQUEST, Reply::Err(e.to_string()));
            }
        };

        debug!(path = %self.path, %method, "dispatching call");

        let reply = match &self.handler {
            None => Reply::Err(format!("no handler registered for {}", self.path)),
            Some(handler) => match AssertUnwindSafe(handler.handle(&method, args))
                .catch_unwind()
                .await
            {
                Ok(result) => result.into(),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    warn!(path = %self.path, %method, "handler panicked: {}", message);
                    Reply::Err(format!("handler panicked: {}", message))
                }
            },
        };

        reply_response(StatusCode::OK, reply)
    }
}

fn reply_response(status: StatusCode, reply: Reply) -> Response {
    let empty = matches!(reply, Reply::Ok(None));
    match reply.encode() {
        Ok(_) if empty => status.into_response(),
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode reply: {}", e),
        )
            .into_response(),
    }
}

async fn call_handler(State(route): State<Arc<Route>>, body: Bytes) -> Response {
    route.dispatch(body).await
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

#[derive(Default)]
struct ServerState {
    listening: bool,
    running: Option<Running>,
}

/// Serves one handler at the configured path
///
/// With an external app the route is mounted on construction and
/// `listen`/`stop` only track state; the route stays mounted until the
/// server is dropped. Otherwise `listen` binds its own listener. Dropping a
/// listening server shuts its listener down.
pub struct Server {
    config: Arc<TransportConfig>,
    route: Arc<Route>,
    state: Mutex<ServerState>,
}

impl Server {
    /// Create a server; prefer [`Transport::server`](crate::Transport::server)
    pub fn new(config: Arc<TransportConfig>, handler: Option<Arc<dyn CallHandler>>) -> Self {
        let route = Arc::new(Route::new(config.path().to_string(), handler));
        if let Some(app) = config.external_app() {
            app.mount(Arc::clone(&route));
        }

        Self {
            config,
            route,
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Create Axum router
    fn create_router(route: Arc<Route>) -> Router {
        let path = route.path().to_string();
        Router::new()
            .route(&path, post(call_handler))
            .with_state(route)
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub fn path(&self) -> &str {
        self.route.path()
    }

    pub async fn is_listening(&self) -> bool {
        self.state.lock().await.listening
    }

    /// Address of the owned listener while listening
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state
            .lock()
            .await
            .running
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Start accepting calls; a no-op when already listening
    pub async fn listen(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.listening {
            return Ok(());
        }

        if self.config.external_app().is_some() {
            state.listening = true;
            info!(path = %self.path(), "server mounted on shared app");
            return Ok(());
        }

        let address = self
            .config
            .address()
            .ok_or_else(|| Error::Bind("no address configured".into()))?;

        let acceptor = match self.config.ssl() {
            Ssl::Disabled => None,
            Ssl::Enabled(options) => Some(
                tls::acceptor(options).map_err(|e| Error::Bind(e.to_string()))?,
            ),
        };

        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(|e| Error::Bind(format!("{}:{}: {}", address.host, address.port, e)))?;
        let local_addr = listener.local_addr()?;

        let app = Self::create_router(Arc::clone(&self.route));
        let (shutdown, signal) = oneshot::channel::<()>();
        let signal = async move {
            let _ = signal.await;
        };

        let task = match acceptor {
            None => tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(signal)
                    .await
            }),
            Some(acceptor) => {
                let listener = tls::TlsListener::new(listener, acceptor)?;
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(signal)
                        .await
                })
            }
        };

        info!(
            %local_addr,
            path = %self.path(),
            tls = self.config.ssl().is_enabled(),
            "server listening"
        );

        state.listening = true;
        state.running = Some(Running {
            local_addr,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Stop accepting calls; a no-op when not listening
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.listening {
            return Ok(());
        }
        state.listening = false;

        let Some(running) = state.running.take() else {
            info!(path = %self.path(), "server detached from shared app");
            return Ok(());
        };

        let _ = running.shutdown.send(());
        let mut task = running.task;
        let outcome = match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(Error::Close(e.to_string())),
            Ok(Err(e)) => Err(Error::Close(e.to_string())),
            Err(_) => {
                warn!(path = %self.path(), "in-flight calls outlived shutdown grace period");
                task.abort();
                Ok(())
            }
        };

        info!(local_addr = %running.local_addr, path = %self.path(), "server stopped");
        outcome
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(app) = self.config.external_app() {
            app.unmount(&self.route);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler_fn, HandlerError};
    use axum::body::to_bytes;
    use serde_json::{json, Value};

    async fn body_of(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn route<H: CallHandler>(handler: H) -> Route {
        Route::new("/ht".into(), Some(Arc::new(handler)))
    }

    #[tokio::test]
    async fn test_dispatch_success_and_errors() {
        let route = route(handler_fn(|method, args| async move {
            match method.as_str() {
                "echo" => Ok(Some(args)),
                "fail" => Err(HandlerError::new("bad input")),
                "io" => Err(HandlerError::from(io::Error::new(
                    io::ErrorKind::Other,
                    "io broke",
                ))),
                _ => Ok(None),
            }
        }));

        let response = route
            .dispatch(Bytes::copy_from_slice(
                r#"{"method":"echo","args":{"x":"ö"}}"#.as_bytes(),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value: Value = serde_json::from_slice(&body_of(response).await).unwrap();
        assert_eq!(value, json!({ "x": "ö" }));

        let response = route
            .dispatch(Bytes::from_static(br#"{"method":"fail","args":null}"#))
            .await;
        assert_eq!(
            Reply::decode(&body_of(response).await).unwrap(),
            Reply::Err("bad input".into())
        );

        let response = route
            .dispatch(Bytes::from_static(br#"{"method":"io"}"#))
            .await;
        assert_eq!(
            Reply::decode(&body_of(response).await).unwrap(),
            Reply::Err("io broke".into())
        );

        let response = route
            .dispatch(Bytes::from_static(br#"{"method":"nothing"}"#))
            .await;
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_malformed_call() {
        let route = route(handler_fn(|_, _| async { Ok(None) }));
        let response = route.dispatch(Bytes::from_static(b"hello")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            Reply::decode(&body_of(response).await),
            Ok(Reply::Err(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_survives_handler_panic() {
        let route = route(handler_fn(|_, _| async {
            if true {
                panic!("kaboom");
            }
            Ok(None)
        }));
        let response = route
            .dispatch(Bytes::from_static(br#"{"method":"x"}"#))
            .await;
        assert_eq!(
            Reply::decode(&body_of(response).await).unwrap(),
            Reply::Err("handler panicked: kaboom".into())
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_handler() {
        let route = Route::new("/svc".into(), None);
        let response = route
            .dispatch(Bytes::from_static(br#"{"method":"x"}"#))
            .await;
        assert_eq!(
            Reply::decode(&body_of(response).await).unwrap(),
            Reply::Err("no handler registered for /svc".into())
        );
    }
}
