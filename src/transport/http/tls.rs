//! TLS for both ends of the transport.
//!
//! Owned servers terminate TLS with rustls in front of axum; clients hand the
//! same [`TlsOptions`] to reqwest's rustls backend.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use rustls::{
    crypto::{ring, CryptoProvider},
    pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    RootCertStore, ServerConfig,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tracing::{debug, warn};

use crate::{transport::config::TlsOptions, Error, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for axum to pick them up
const ACCEPT_BACKLOG: usize = 64;

fn tls_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Tls(format!("{}: {}", context, e))
}

fn parse_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error("invalid certificate", e))?;
    if certs.is_empty() {
        return Err(Error::Tls("no certificate found in PEM".into()));
    }
    Ok(certs)
}

/// Build the rustls server configuration for an owned listener
pub fn server_config(options: &TlsOptions) -> Result<Arc<ServerConfig>> {
    let cert = options
        .cert
        .as_deref()
        .ok_or_else(|| Error::Tls("a certificate is required to serve TLS".into()))?;
    let key = options
        .key
        .as_deref()
        .ok_or_else(|| Error::Tls("a private key is required to serve TLS".into()))?;

    let certs = parse_certs(cert)?;
    let key = PrivateKeyDer::from_pem_slice(key.as_bytes())
        .map_err(|e| tls_error("invalid private key", e))?;

    let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error("unsupported protocol versions", e))?;

    let builder = if options.request_cert {
        let mut roots = RootCertStore::empty();
        for pem in &options.ca {
            for ca in parse_certs(pem)? {
                roots
                    .add(ca)
                    .map_err(|e| tls_error("invalid CA certificate", e))?;
            }
        }
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
        let verifier = if options.reject_unauthorized {
            verifier
        } else {
            verifier.allow_unauthenticated()
        };
        builder.with_client_cert_verifier(
            verifier
                .build()
                .map_err(|e| tls_error("client verifier", e))?,
        )
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| tls_error("certificate rejected", e))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

pub(crate) fn acceptor(options: &TlsOptions) -> Result<TlsAcceptor> {
    Ok(TlsAcceptor::from(server_config(options)?))
}

type Accepted = (TlsStream<TcpStream>, SocketAddr);

/// TLS listener for axum
///
/// A background task accepts TCP connections and runs every handshake in
/// its own task; `accept` only yields connections whose handshake has
/// finished, so a stalled peer never holds up the others.
pub(crate) struct TlsListener {
    local_addr: SocketAddr,
    accepted: mpsc::Receiver<Accepted>,
    accept_task: JoinHandle<()>,
}

impl TlsListener {
    pub(crate) fn new(inner: TcpListener, acceptor: TlsAcceptor) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        let (tx, accepted) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(inner, acceptor, tx));
        Ok(Self {
            local_addr,
            accepted,
            accept_task,
        })
    }
}

async fn accept_loop(mut inner: TcpListener, acceptor: TlsAcceptor, tx: mpsc::Sender<Accepted>) {
    loop {
        let (stream, addr) = tokio::select! {
            accepted = axum::serve::Listener::accept(&mut inner) => accepted,
            _ = tx.closed() => {
                debug!("TLS listener closed");
                return;
            }
        };

        let acceptor = acceptor.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => {
                    let _ = tx.send((stream, addr)).await;
                }
                Ok(Err(e)) => warn!(%addr, "TLS handshake failed: {}", e),
                Err(_) => warn!(%addr, "TLS handshake timed out"),
            }
        });
    }
}

impl Drop for TlsListener {
    fn drop(&mut self) {
        // releases the TCP socket
        self.accept_task.abort();
    }
}

impl axum::serve::Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.accepted.recv().await {
            Some(accepted) => accepted,
            // the accept task only ends once this listener is dropped
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// Apply TLS options to a reqwest client builder
pub(crate) fn client_builder(
    builder: reqwest::ClientBuilder,
    options: &TlsOptions,
) -> Result<reqwest::ClientBuilder> {
    let mut builder = builder.use_rustls_tls();

    for pem in &options.ca {
        for cert in reqwest::Certificate::from_pem_bundle(pem.as_bytes())? {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let (Some(cert), Some(key)) = (&options.cert, &options.key) {
        let mut identity = cert.clone().into_bytes();
        identity.push(b'\n');
        identity.extend_from_slice(key.as_bytes());
        builder = builder.identity(reqwest::Identity::from_pem(&identity)?);
    }

    if !options.reject_unauthorized {
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}
