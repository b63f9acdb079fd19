//! Shared upstream connection pool.
//!
//! # Data Flow
//! ```text
//! Executor needs a connection for (scheme, host, port)
//!     → mod.rs (find or create the HostPool for that key)
//!     → wait for a slot (semaphore, bounded by acquire timeout)
//!     → reuse an idle connection if it is open, fresh and ready within the connect timeout
//!     → otherwise connector.rs dials a new one
//!     → connection.rs PooledConnection (exclusive checkout)
//!
//! Response body drained → release(clean)  → idle list
//! Error / abort / drop   → release(tainted) → discarded
//! ```
//!
//! # Design Decisions
//! - The pool is the only shared mutable state in the forwarding path
//! - One semaphore per origin caps idle + checked-out connections
//! - Idle lists are LIFO so the warmest connection is reused first
//! - A background reaper evicts expired idle connections and empty origins

pub mod connection;
pub mod connector;
pub mod key;

pub use connection::{Connection, PooledConnection};
pub use connector::Connector;
pub use key::{PoolKey, UpstreamScheme};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::ProxyError;
use crate::observability::metrics;
use connection::IdleConnection;

/// Connections to a single origin.
pub struct HostPool {
    pub(crate) key: PoolKey,
    slots: Arc<Semaphore>,
    capacity: usize,
    max_idle: usize,
    idle: Mutex<Vec<IdleConnection>>,
}

impl HostPool {
    fn new(key: PoolKey, capacity: usize, max_idle: usize) -> Self {
        Self {
            key,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    pub(crate) fn put_idle(&self, conn: Connection) {
        if self.max_idle == 0 {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.max_idle {
            // Oldest first; dropping it closes the socket.
            idle.remove(0);
        }
        idle.push(IdleConnection::new(conn));
    }

    fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.slots.available_permits())
    }

    fn evict_expired(&self, idle_timeout: Duration) -> usize {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let before = idle.len();
        idle.retain(|c| c.is_reusable(idle_timeout));
        before - idle.len()
    }
}

/// Snapshot of one origin's pool, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub origin: String,
    pub idle: usize,
    pub in_use: usize,
    pub capacity: usize,
}

/// Pool of upstream connections keyed by (scheme, host, port).
pub struct ConnectionPool {
    hosts: DashMap<PoolKey, Arc<HostPool>>,
    config: PoolConfig,
    connector: Connector,
    connect_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, connector: Connector, connect_timeout: Duration) -> Self {
        Self {
            hosts: DashMap::new(),
            config,
            connector,
            connect_timeout,
        }
    }

    /// Check out a connection to `key` for exclusive use.
    ///
    /// Waits at most `acquire_timeout` for a free slot, then reuses an idle
    /// connection or dials a new one.
    pub async fn acquire(&self, key: &PoolKey) -> Result<PooledConnection, ProxyError> {
        let host = self
            .hosts
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(HostPool::new(
                    key.clone(),
                    self.config.max_connections_per_host,
                    self.config.max_idle_per_host,
                ))
            })
            .value()
            .clone();

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout(),
            host.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::warn!(
                    origin = %key,
                    max_connections = host.capacity,
                    "Connection pool exhausted"
                );
                metrics::record_pool_event("exhausted");
                return Err(ProxyError::PoolExhausted(key.clone()));
            }
        };

        let idle_timeout = self.config.idle_timeout();
        while let Some(idle) = host.pop_idle() {
            if !idle.is_reusable(idle_timeout) {
                metrics::record_pool_event("expired");
                continue;
            }
            // A connection can be parked while hyper is still writing a request
            // body the upstream never read; readiness then never arrives.
            let mut conn = idle.conn;
            match tokio::time::timeout(self.connect_timeout, conn.ready()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    metrics::record_pool_event("expired");
                    continue;
                }
                Err(_) => {
                    tracing::debug!(origin = %key, "Idle connection never became ready, discarding");
                    metrics::record_pool_event("expired");
                    continue;
                }
            }
            tracing::trace!(origin = %key, "Reusing pooled connection");
            metrics::record_pool_event("reused");
            return Ok(PooledConnection::new(conn, host, permit, true));
        }

        let conn = self.connector.connect(key, self.connect_timeout).await?;
        metrics::record_pool_event("created");
        Ok(PooledConnection::new(conn, host, permit, false))
    }

    /// Per-origin snapshot.
    pub fn stats(&self) -> Vec<HostStats> {
        let mut stats: Vec<HostStats> = self
            .hosts
            .iter()
            .map(|entry| {
                let host = entry.value();
                HostStats {
                    origin: host.key.to_string(),
                    idle: host.idle_count(),
                    in_use: host.in_use(),
                    capacity: host.capacity,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.origin.cmp(&b.origin));
        stats
    }

    /// Evict expired idle connections and forget origins with nothing left.
    ///
    /// Returns the number of evicted connections.
    pub fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut evicted = 0;
        self.hosts.retain(|_, host| {
            evicted += host.evict_expired(idle_timeout);
            // strong_count == 1 under the shard lock: nobody is mid-acquire.
            !(Arc::strong_count(host) == 1 && host.in_use() == 0 && host.idle_count() == 0)
        });
        evicted
    }

    /// Run `reap_idle` periodically until shutdown.
    pub fn spawn_reaper(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let period = (self.config.idle_timeout() / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = pool.reap_idle();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted idle upstream connections");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Pool reaper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}
