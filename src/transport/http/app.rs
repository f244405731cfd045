//! Caller-owned HTTP app shared by several transports.
//!
//! Every transport built with the same [`SharedApp`] mounts its route under
//! its own path. The caller serves the app and owns the listener; servers
//! mounted here never bind or close sockets themselves.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use axum::{
    body::Bytes,
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tracing::{debug, warn};

use super::server::Route;

/// Routing table shared between the caller and mounted transports
#[derive(Clone, Default)]
pub struct SharedApp {
    routes: Arc<RwLock<HashMap<String, Arc<Route>>>>,
}

impl SharedApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router dispatching to every mounted path
    ///
    /// Routes mounted after the router is built are still reached.
    pub fn router(&self) -> Router {
        self.attach(Router::new())
    }

    /// Install the mounted paths as the fallback of an existing router
    pub fn attach<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let app = self.clone();
        router.fallback(move |method: Method, uri: Uri, body: Bytes| {
            let app = app.clone();
            async move { app.dispatch(method, uri.path(), body).await }
        })
    }

    /// Paths currently mounted
    pub fn paths(&self) -> Vec<String> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = routes.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub(crate) fn mount(&self, route: Arc<Route>) {
        let path = route.path().to_string();
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.insert(path.clone(), route).is_some() {
            warn!(%path, "replacing route already mounted on shared app");
        } else {
            debug!(%path, "mounted route on shared app");
        }
    }

    /// Remove `route` if it is still the one mounted at its path
    pub(crate) fn unmount(&self, route: &Arc<Route>) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let current = routes
            .get(route.path())
            .is_some_and(|mounted| Arc::ptr_eq(mounted, route));
        if current {
            routes.remove(route.path());
            debug!(path = %route.path(), "unmounted route from shared app");
        }
        current
    }

    async fn dispatch(&self, method: Method, path: &str, body: Bytes) -> Response {
        let route = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes.get(path).cloned()
        };

        match route {
            Some(route) if method == Method::POST => route.dispatch(body).await,
            Some(_) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

impl fmt::Debug for SharedApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedApp")
            .field("paths", &self.paths())
            .finish()
    }
}
