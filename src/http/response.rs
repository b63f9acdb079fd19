//! Response finalization.
//!
//! # Responsibilities
//! - Turn the forwarding result into the caller's response
//! - Record request metrics and the outcome log line
//!
//! # Design Decisions
//! - Errors render as `{"error": kind, "message": text}` via `ProxyError`
//! - Caller mistakes log at debug, upstream failures at warn
//! - Duration is measured to the response head; the body streams afterwards

use std::time::Instant;

use axum::body::Body;
use axum::http::{Method, Response};
use axum::response::IntoResponse;

use crate::error::ProxyError;
use crate::observability::metrics;

/// Label used for requests that never resolved an upstream.
pub const NO_UPSTREAM: &str = "none";

/// Finish one proxied request.
pub fn finalize(
    result: Result<Response<Body>, ProxyError>,
    method: &Method,
    upstream: &str,
    start: Instant,
) -> Response<Body> {
    let response = match result {
        Ok(response) => {
            tracing::info!(
                status = response.status().as_u16(),
                upstream = %upstream,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Proxied request"
            );
            response
        }
        Err(e) => {
            if e.is_client_error() {
                tracing::debug!(error = %e, kind = e.kind(), "Rejected proxy request");
            } else {
                tracing::warn!(
                    error = %e,
                    kind = e.kind(),
                    upstream = %upstream,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Upstream request failed"
                );
                metrics::record_upstream_error(e.kind());
            }
            e.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), upstream, start);
    response
}
