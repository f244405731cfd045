//! Transport configuration and its resolution into an immutable
//! [`TransportConfig`].

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::http::SharedApp;
use crate::protocol::DEFAULT_PATH;

/// Configuration rejected at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host and port are required when no external app is given")]
    MissingAddress,

    #[error("port {0} is given without a host")]
    MissingHost(u16),

    #[error("host {0:?} is given without a port")]
    MissingPort(String),

    #[error("port must be between 1 and 65535")]
    InvalidPort,

    #[error("path {0:?} must be non-empty and start with '/'")]
    InvalidPath(String),

    #[error("invalid configuration document: {0}")]
    Parse(String),
}

/// TLS material, passed through to rustls as given
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// PEM certificate chain presented by this side
    #[serde(default)]
    pub cert: Option<String>,
    /// PEM private key matching `cert`
    #[serde(default)]
    pub key: Option<String>,
    /// Additional trusted PEM certificates
    #[serde(default)]
    pub ca: Vec<String>,
    /// Verify the peer certificate
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
    /// Ask clients for a certificate (server side)
    #[serde(default)]
    pub request_cert: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            cert: None,
            key: None,
            ca: Vec::new(),
            reject_unauthorized: true,
            request_cert: false,
        }
    }
}

/// `ssl` as written in a configuration document: a flag or TLS options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SslOption {
    Flag(bool),
    Options(TlsOptions),
}

impl Default for SslOption {
    fn default() -> Self {
        SslOption::Flag(false)
    }
}

/// Resolved TLS setting
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Ssl {
    #[default]
    Disabled,
    Enabled(TlsOptions),
}

impl Ssl {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Ssl::Enabled(_))
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Ssl::Disabled => "http",
            Ssl::Enabled(_) => "https",
        }
    }
}

impl From<SslOption> for Ssl {
    fn from(option: SslOption) -> Self {
        match option {
            SslOption::Flag(false) => Ssl::Disabled,
            SslOption::Flag(true) => Ssl::Enabled(TlsOptions::default()),
            SslOption::Options(options) => Ssl::Enabled(options),
        }
    }
}

/// Unresolved transport options
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub ssl: SslOption,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
    /// Caller-owned app to mount routes on instead of listening
    #[serde(skip)]
    pub external_app: Option<SharedApp>,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = SslOption::Flag(ssl);
        self
    }

    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.ssl = SslOption::Options(options);
        self
    }

    pub fn timeout_millis(mut self, millis: u64) -> Self {
        self.timeout_millis = Some(millis);
        self
    }

    pub fn external_app(mut self, app: SharedApp) -> Self {
        self.external_app = Some(app);
        self
    }
}

/// Host and port a server binds and a client dials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

/// Resolved, immutable transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    address: Option<Address>,
    external_app: Option<SharedApp>,
    path: String,
    ssl: Ssl,
    timeout: Option<Duration>,
}

impl TransportConfig {
    /// Validate options and apply defaults
    ///
    /// A half address (host without port or the reverse) is only an error
    /// when no external app is given; with an app it is ignored.
    pub fn resolve(options: TransportOptions) -> Result<Self, ConfigError> {
        let mounted = options.external_app.is_some();
        let address = match (options.host, options.port) {
            (Some(host), Some(port)) => {
                if port == 0 {
                    return Err(ConfigError::InvalidPort);
                }
                Some(Address { host, port })
            }
            (Some(_), None) | (None, Some(_)) | (None, None) if mounted => None,
            (Some(host), None) => return Err(ConfigError::MissingPort(host)),
            (None, Some(port)) => return Err(ConfigError::MissingHost(port)),
            (None, None) => return Err(ConfigError::MissingAddress),
        };

        let path = options.path.unwrap_or_else(|| DEFAULT_PATH.to_string());
        if !path.starts_with('/') {
            return Err(ConfigError::InvalidPath(path));
        }

        // 0 means no deadline, same as leaving it out
        let timeout = options
            .timeout_millis
            .filter(|&millis| millis > 0)
            .map(Duration::from_millis);

        Ok(Self {
            address,
            external_app: options.external_app,
            path,
            ssl: options.ssl.into(),
            timeout,
        })
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn external_app(&self) -> Option<&SharedApp> {
        self.external_app.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn ssl(&self) -> &Ssl {
        &self.ssl
    }

    /// Call deadline; `None` waits forever
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// URL clients post calls to, if an address is configured
    pub fn url(&self) -> Option<String> {
        self.address.as_ref().map(|address| {
            format!(
                "{}://{}:{}{}",
                self.ssl.scheme(),
                address.host,
                address.port,
                self.path
            )
        })
    }
}
