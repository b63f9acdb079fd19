//! Dialing upstream origins.
//!
//! # Responsibilities
//! - Resolve the host and open a TCP connection
//! - Wrap https origins in rustls
//! - Perform the HTTP/1.1 client handshake and spawn the connection driver
//!
//! # Design Decisions
//! - The whole dial runs under the connect timeout
//! - Every resolved address is tried in order; the last error wins
//! - Only http/1.1 is offered over ALPN

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{ProxyError, TimeoutPhase};
use crate::pool::connection::Connection;
use crate::pool::key::{PoolKey, UpstreamScheme};
use crate::resilience::timeouts::{self, with_deadline};

/// Opens fresh upstream connections.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
}

impl Connector {
    /// Build a connector trusting the webpki root store.
    pub fn new() -> Result<Self, rustls::Error> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Dial `key` within `timeout`.
    pub async fn connect(&self, key: &PoolKey, timeout: Duration) -> Result<Connection, ProxyError> {
        let deadline = timeouts::deadline_after(timeout);
        with_deadline(deadline, TimeoutPhase::Connect, self.dial(key))
            .await
            .inspect_err(|_| {
                tracing::warn!(origin = %key, timeout_ms = timeout.as_millis() as u64, "Upstream connect timed out");
            })?
    }

    async fn dial(&self, key: &PoolKey) -> Result<Connection, ProxyError> {
        let host = key.dial_host();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, key.port))
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(format!("DNS lookup for {} failed: {}", host, e)))?
            .collect();

        let stream = connect_any(key, &addrs).await?;
        let _ = stream.set_nodelay(true);

        match key.scheme {
            UpstreamScheme::Http => handshake(TokioIo::new(stream), key).await,
            UpstreamScheme::Https => {
                let server_name = ServerName::try_from(host.to_string()).map_err(|e| {
                    ProxyError::UpstreamUnreachable(format!("invalid TLS server name {}: {}", host, e))
                })?;
                let tls_stream = self.tls.connect(server_name, stream).await.map_err(|e| {
                    ProxyError::UpstreamUnreachable(format!("TLS handshake with {} failed: {}", key, e))
                })?;
                handshake(TokioIo::new(tls_stream), key).await
            }
        }
    }
}

async fn connect_any(key: &PoolKey, addrs: &[SocketAddr]) -> Result<TcpStream, ProxyError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::debug!(origin = %key, addr = %addr, "Upstream connection established");
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(origin = %key, addr = %addr, error = %e, "Upstream connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(ProxyError::UpstreamUnreachable(match last_error {
        Some(e) => format!("connect to {} failed: {}", key, e),
        None => format!("no addresses resolved for {}", key),
    }))
}

async fn handshake<T>(io: TokioIo<T>, key: &PoolKey) -> Result<Connection, ProxyError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::Builder::new()
        .handshake::<_, Body>(io)
        .await
        .map_err(|e| ProxyError::UpstreamProtocolError(format!("handshake with {} failed: {}", key, e)))?;

    let origin = key.to_string();
    let driver = tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(origin = %origin, error = %e, "Upstream connection closed with error");
        }
    });

    Ok(Connection::new(sender, driver))
}
