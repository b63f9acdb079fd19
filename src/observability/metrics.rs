//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, upstream errors, pool activity)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, upstream
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_upstream_errors_total` (counter): failures by error kind
//! - `proxy_client_disconnects_total` (counter): callers gone mid-relay
//! - `proxy_relayed_bytes_total` (counter): response bytes written to callers
//! - `proxy_pool_connections_total` (counter): pool events (created, reused, ...)
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so tests need no setup
//! - Upstream label is the origin, never the full URL (bounded cardinality)

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished request (response head sent or error rendered).
pub fn record_request(method: &str, status: u16, upstream: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("upstream", upstream.to_string()),
    ];
    counter!("proxy_requests_total", &labels).increment(1);
    histogram!("proxy_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

/// Record a forwarding failure by error kind.
pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

/// Record a caller that disconnected before the body was fully relayed.
pub fn record_client_disconnected() {
    counter!("proxy_client_disconnects_total").increment(1);
}

/// Record response bytes relayed to a caller.
pub fn record_relayed_bytes(bytes: u64) {
    counter!("proxy_relayed_bytes_total").increment(bytes);
}

/// Record a pool lifecycle event.
pub fn record_pool_event(event: &'static str) {
    counter!("proxy_pool_connections_total", "event" => event).increment(1);
}
