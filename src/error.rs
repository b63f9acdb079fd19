//! Proxy error taxonomy.
//!
//! # Responsibilities
//! - Name every way a forwarding attempt can fail
//! - Map each failure to the status code the caller sees
//! - Render a minimal JSON diagnostic body
//!
//! # Design Decisions
//! - Client-input errors never contact upstream (4xx)
//! - Upstream failures surface as 502/503/504
//! - `ClientDisconnected` is recorded but never rendered; the caller is gone

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::pool::PoolKey;

/// Phase of the upstream exchange in which a timeout fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// DNS lookup, TCP connect, TLS and HTTP handshake.
    Connect,
    /// Waiting for the response head or reading the response body.
    Response,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Response => write!(f, "response"),
        }
    }
}

/// Errors raised while forwarding a single request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Target URL missing, relative, or not http/https.
    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    /// Target URL refused by the URL validator.
    #[error("target rejected: {0}")]
    TargetRejected(String),

    /// Method outside the configured supported set.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(Method),

    /// The inbound request body could not be read.
    #[error("request body error: {0}")]
    RequestBody(String),

    /// DNS failure, refused connection, or failed TLS handshake.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Connect or response deadline exceeded.
    #[error("upstream timed out during {0}")]
    UpstreamTimeout(TimeoutPhase),

    /// Malformed response or connection closed mid-message.
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(String),

    /// No connection slot for the origin within the acquire timeout.
    #[error("connection pool exhausted for {0}")]
    PoolExhausted(PoolKey),

    /// The caller went away before the response was fully relayed.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl ProxyError {
    /// Status code surfaced to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTarget(_) | ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::TargetRejected(_) => StatusCode::FORBIDDEN,
            ProxyError::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::UpstreamUnreachable(_) | ProxyError::UpstreamProtocolError(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Only ever seen by metrics; nginx's convention for a vanished client.
            ProxyError::ClientDisconnected => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    /// Stable machine-readable name, used in logs, metrics and diagnostic bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTarget(_) => "invalid_target",
            ProxyError::TargetRejected(_) => "target_rejected",
            ProxyError::UnsupportedMethod(_) => "unsupported_method",
            ProxyError::RequestBody(_) => "request_body",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::UpstreamProtocolError(_) => "upstream_protocol_error",
            ProxyError::PoolExhausted(_) => "pool_exhausted",
            ProxyError::ClientDisconnected => "client_disconnected",
        }
    }

    /// True for errors caused by the caller's input rather than upstream.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProxyError::InvalidTarget(_)
                | ProxyError::TargetRejected(_)
                | ProxyError::UnsupportedMethod(_)
                | ProxyError::RequestBody(_)
        )
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Map a hyper client error to the taxonomy.
pub fn classify_hyper_error(err: &hyper::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout(TimeoutPhase::Response)
    } else if err.is_parse() || err.is_parse_status() || err.is_incomplete_message() {
        ProxyError::UpstreamProtocolError(err.to_string())
    } else if err.is_user() || err.is_body_write_aborted() {
        ProxyError::RequestBody(err.to_string())
    } else if err.is_canceled() || err.is_closed() {
        ProxyError::UpstreamProtocolError(format!("connection closed: {}", err))
    } else {
        ProxyError::UpstreamProtocolError(err.to_string())
    }
}
