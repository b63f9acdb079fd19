//! Pooled upstream connections.
//!
//! # Responsibilities
//! - Own one HTTP/1.1 client connection and its driver task
//! - Hand a connection out exclusively (`PooledConnection`)
//! - Return it to the idle list when clean, discard it when tainted
//!
//! # Design Decisions
//! - Dropping a `PooledConnection` without `release` discards it as tainted
//! - Discarding aborts the driver task, which closes the socket
//! - The per-host slot (semaphore permit) is freed only after the idle push

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response};
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;

use crate::error::ProxyError;
use crate::observability::metrics;
use crate::pool::key::PoolKey;
use crate::pool::HostPool;

/// A live HTTP/1.1 client connection to one origin.
pub struct Connection {
    sender: SendRequest<Body>,
    driver: JoinHandle<()>,
    created_at: Instant,
}

impl Connection {
    pub(crate) fn new(sender: SendRequest<Body>, driver: JoinHandle<()>) -> Self {
        Self {
            sender,
            driver,
            created_at: Instant::now(),
        }
    }

    /// False once the upstream closed the connection or the driver exited.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Time since the connection was established.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) async fn ready(&mut self) -> Result<(), hyper::Error> {
        self.sender.ready().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// An idle connection parked in a host pool.
pub(crate) struct IdleConnection {
    pub(crate) conn: Connection,
    pub(crate) idle_since: Instant,
}

impl IdleConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            idle_since: Instant::now(),
        }
    }

    pub(crate) fn is_reusable(&self, idle_timeout: Duration) -> bool {
        self.conn.is_open() && self.idle_since.elapsed() < idle_timeout
    }
}

/// A connection checked out of the pool for exclusive use by one request.
pub struct PooledConnection {
    conn: Option<Connection>,
    host: Arc<HostPool>,
    reused: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn new(
        conn: Connection,
        host: Arc<HostPool>,
        permit: OwnedSemaphorePermit,
        reused: bool,
    ) -> Self {
        Self {
            conn: Some(conn),
            host,
            reused,
            _permit: permit,
        }
    }

    /// Origin this connection talks to.
    pub fn key(&self) -> &PoolKey {
        &self.host.key
    }

    /// True when the connection came from the idle list.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Send a request on this connection.
    ///
    /// The returned future does not borrow the connection, so the caller can
    /// still release it (tainted) if the future is abandoned.
    pub fn send_request(
        &mut self,
        request: Request<Body>,
    ) -> Result<impl Future<Output = Result<Response<Incoming>, hyper::Error>>, ProxyError> {
        match self.conn.as_mut() {
            Some(conn) => Ok(conn.sender.send_request(request)),
            None => Err(ProxyError::UpstreamProtocolError(
                "connection already released".to_string(),
            )),
        }
    }

    /// Give the connection back to its pool.
    ///
    /// Tainted or closed connections are discarded instead of pooled.
    pub fn release(mut self, tainted: bool) {
        if let Some(conn) = self.conn.take() {
            if tainted || !conn.is_open() {
                tracing::debug!(
                    origin = %self.host.key,
                    tainted,
                    age_ms = conn.age().as_millis() as u64,
                    "Discarding upstream connection"
                );
                metrics::record_pool_event("discarded");
            } else {
                self.host.put_idle(conn);
                metrics::record_pool_event("released");
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            tracing::trace!(origin = %self.host.key, "Connection dropped before release, discarding");
            metrics::record_pool_event("discarded");
        }
    }
}
