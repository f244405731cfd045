use std::sync::Arc;

use crate::Result;

pub mod config;
pub mod http;

pub use self::config::*;
pub use self::http::*;

/// Factory pairing a [`Server`] and a [`Client`] over one resolved config
///
/// Cloning is cheap; clones share the same configuration.
#[derive(Debug, Clone)]
pub struct Transport {
    config: Arc<TransportConfig>,
}

impl Transport {
    /// Resolve options into a transport
    pub fn new(options: TransportOptions) -> std::result::Result<Self, ConfigError> {
        Ok(Self::from_config(TransportConfig::resolve(options)?))
    }

    /// Wrap an already resolved config
    pub fn from_config(config: TransportConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    /// Create a server dispatching calls to `handler`
    pub fn server<H: CallHandler>(&self, handler: H) -> Server {
        Server::new(Arc::clone(&self.config), Some(Arc::new(handler)))
    }

    /// Create a server with a handler shared with other servers
    pub fn server_shared(&self, handler: Arc<dyn CallHandler>) -> Server {
        Server::new(Arc::clone(&self.config), Some(handler))
    }

    /// Create a server that answers every call with an error
    pub fn server_without_handler(&self) -> Server {
        Server::new(Arc::clone(&self.config), None)
    }

    /// Create a client issuing calls to the configured address
    pub fn client(&self) -> Result<Client> {
        Client::new(Arc::clone(&self.config))
    }
}

impl TryFrom<TransportOptions> for Transport {
    type Error = ConfigError;

    fn try_from(options: TransportOptions) -> std::result::Result<Self, Self::Error> {
        Self::new(options)
    }
}

impl From<TransportConfig> for Transport {
    fn from(config: TransportConfig) -> Self {
        Self::from_config(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_and_client_share_config() {
        let transport =
            Transport::new(TransportOptions::new().host("127.0.0.1").port(4100)).unwrap();
        let server = transport.server_without_handler();
        let client = transport.client().unwrap();
        assert!(Arc::ptr_eq(server.config(), transport.config()));
        assert!(Arc::ptr_eq(client.config(), transport.config()));
        assert_eq!(server.path(), "/ht");
    }

    #[test]
    fn test_entry_points_are_equivalent() {
        let options = || TransportOptions::new().host("127.0.0.1").port(4101).path("/svc");
        let a = Transport::new(options()).unwrap();
        let b = Transport::try_from(options()).unwrap();
        assert_eq!(a.config().url(), b.config().url());
        assert_eq!(a.config().path(), b.config().path());
    }

    #[test]
    fn test_missing_address_fails_construction() {
        assert_eq!(
            Transport::new(TransportOptions::new()).unwrap_err(),
            ConfigError::MissingAddress
        );
    }

    #[tokio::test]
    async fn test_mounting_server_registers_path() {
        let app = SharedApp::new();
        let transport =
            Transport::new(TransportOptions::new().external_app(app.clone()).path("/a")).unwrap();
        let server = transport.server_without_handler();
        assert_eq!(app.paths(), vec!["/a".to_string()]);

        // stop keeps the mount, dropping the server removes it
        server.listen().await.unwrap();
        server.stop().await.unwrap();
        assert_eq!(app.paths(), vec!["/a".to_string()]);
        drop(server);
        assert!(app.paths().is_empty());
    }

    #[test]
    fn test_dropping_replaced_server_keeps_new_route() {
        let app = SharedApp::new();
        let transport =
            Transport::new(TransportOptions::new().external_app(app.clone()).path("/a")).unwrap();
        let old = transport.server_without_handler();
        let new = transport.server_without_handler();
        drop(old);
        assert_eq!(app.paths(), vec!["/a".to_string()]);
        drop(new);
        assert!(app.paths().is_empty());
    }
}
