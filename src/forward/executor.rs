//! Transport execution.
//!
//! # Responsibilities
//! - Check a connection out of the pool (one retry for unreachable origins)
//! - Buffer small request bodies of known length, stream the rest
//! - Send the request and wait for the response head under the deadline
//!
//! # Design Decisions
//! - Redirects are never followed; a 3xx is just another response
//! - On any failure the connection is released as tainted
//! - On success the connection travels with the response body, which
//!   releases it once drained

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response, Version};
use hyper::body::Incoming;
use tokio::time::Instant;

use crate::error::{classify_hyper_error, ProxyError, TimeoutPhase};
use crate::forward::translator::OutboundRequest;
use crate::forward::ForwardSettings;
use crate::observability::metrics;
use crate::pool::{ConnectionPool, PoolKey, PooledConnection};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{deadline_after, with_deadline};

/// Upstream response head plus the connection its body is bound to.
pub struct UpstreamResponse {
    pub response: Response<Incoming>,
    pub connection: PooledConnection,
    /// End of the total response budget; also bounds the body relay.
    pub deadline: Instant,
}

/// Issues outbound requests over pooled connections.
pub struct Executor {
    pool: Arc<ConnectionPool>,
}

impl Executor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub async fn execute(
        &self,
        outbound: OutboundRequest,
        settings: &ForwardSettings,
    ) -> Result<UpstreamResponse, ProxyError> {
        let OutboundRequest {
            key,
            method,
            uri,
            headers,
            body,
            content_length,
        } = outbound;

        let body = match content_length {
            Some(len) if len <= settings.buffer_threshold as u64 => {
                let bytes = axum::body::to_bytes(body, settings.buffer_threshold)
                    .await
                    .map_err(|e| ProxyError::RequestBody(e.to_string()))?;
                Body::from(bytes)
            }
            _ => body,
        };

        let mut connection = self.acquire(&key, &method, &settings.retry).await?;

        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = Version::HTTP_11;
        *request.headers_mut() = headers;

        let deadline = deadline_after(settings.response_timeout);
        let pending = connection.send_request(request)?;

        match with_deadline(deadline, TimeoutPhase::Response, pending).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    origin = %key,
                    status = response.status().as_u16(),
                    reused = connection.is_reused(),
                    "Upstream response head received"
                );
                Ok(UpstreamResponse {
                    response,
                    connection,
                    deadline,
                })
            }
            Ok(Err(e)) => {
                connection.release(true);
                Err(classify_hyper_error(&e))
            }
            Err(timeout) => {
                connection.release(true);
                Err(timeout)
            }
        }
    }

    async fn acquire(
        &self,
        key: &PoolKey,
        method: &Method,
        retry: &RetryPolicy,
    ) -> Result<PooledConnection, ProxyError> {
        let mut attempt = 1;
        loop {
            match self.pool.acquire(key).await {
                Ok(connection) => return Ok(connection),
                Err(e) if retry.should_retry(method, &e, attempt) => {
                    let delay = retry.delay(attempt);
                    tracing::info!(
                        origin = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying unreachable upstream"
                    );
                    metrics::record_upstream_error(e.kind());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
