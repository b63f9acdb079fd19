//! Request forwarding engine.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (validated target + inbound request)
//!     → translator.rs (method check, origin-form URI, filtered headers)
//!     → executor.rs (pool checkout, send over HTTP/1.1, await response head)
//!     → relay.rs (filtered headers, bounded-chunk body stream)
//!     → Response returned to the caller
//! ```
//!
//! # Design Decisions
//! - The Forwarder holds only read-only settings and an `Arc` to the pool
//! - Bodies are streamed; small bodies of known length are buffered first
//! - Every request walks the phases Received → Translating → Executing →
//!   Relaying → Completed once, or ends in Aborted

pub mod executor;
pub mod headers;
pub mod relay;
pub mod translator;

pub use executor::Executor;
pub use headers::{HeaderClass, HeaderPolicy, HEADER_POLICY};
pub use relay::RelayBody;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Response};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::pool::ConnectionPool;
use crate::resilience::retries::RetryPolicy;

/// Methods that are never forwarded, whatever the configuration says.
const NEVER_FORWARDED: [Method; 2] = [Method::CONNECT, Method::TRACE];

/// Read-only forwarding parameters, rebuilt on config reload.
#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub allowed_methods: Vec<Method>,
    pub chunk_size: usize,
    pub buffer_threshold: usize,
    pub add_forwarded_headers: bool,
    pub trust_forwarded_headers: bool,
    pub response_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ForwardSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let allowed_methods = config
            .forwarding
            .allowed_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).ok())
            .filter(|m| !NEVER_FORWARDED.contains(m))
            .collect();

        Self {
            allowed_methods,
            chunk_size: config.forwarding.chunk_size.max(1),
            buffer_threshold: config.forwarding.buffer_threshold,
            add_forwarded_headers: config.forwarding.add_forwarded_headers,
            trust_forwarded_headers: config.forwarding.trust_forwarded_headers,
            response_timeout: config.upstream.response_timeout(),
            retry: RetryPolicy::from_config(&config.retries),
        }
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// An inbound request paired with its validated target.
///
/// Owned by the handling call; the body is consumed at most once.
pub struct ProxyRequest {
    pub method: Method,
    pub target: Url,
    pub headers: HeaderMap,
    pub body: Body,
    /// Caller address, when the transport exposes one.
    pub peer: Option<SocketAddr>,
    /// Whether the caller reached us over TLS.
    pub inbound_tls: bool,
}

/// Where a request is in its single pass through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Translating,
    Executing,
    Relaying,
    Completed,
    Aborted,
}

impl RequestPhase {
    /// Forward-only transitions; `Aborted` is reachable from `Executing` and `Relaying`.
    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Received, Translating)
                | (Translating, Executing)
                | (Executing, Relaying)
                | (Executing, Aborted)
                | (Relaying, Completed)
                | (Relaying, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Completed | RequestPhase::Aborted)
    }
}

/// Tracks the phase of one request.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: RequestPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RequestPhase::Received,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// Move to `next`. Illegal transitions are ignored.
    pub fn advance(&mut self, next: RequestPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal phase transition {:?} -> {:?}",
            self.phase,
            next
        );
        if self.phase.can_advance_to(next) {
            tracing::trace!(from = ?self.phase, to = ?next, "Request phase");
            self.phase = next;
        }
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Translator → Executor → Relay, composed per request.
///
/// Stateless between requests and safe to share across tasks.
pub struct Forwarder {
    settings: ForwardSettings,
    executor: Executor,
}

impl Forwarder {
    pub fn new(settings: ForwardSettings, pool: Arc<ConnectionPool>) -> Self {
        Self {
            settings,
            executor: Executor::new(pool),
        }
    }

    pub fn settings(&self) -> &ForwardSettings {
        &self.settings
    }

    /// Forward one request and return the streaming response.
    ///
    /// Errors are returned before any response byte was produced. Failures
    /// while relaying the body surface through the body stream instead.
    pub async fn forward(&self, request: ProxyRequest) -> Result<Response<Body>, ProxyError> {
        let mut phase = PhaseTracker::new();

        phase.advance(RequestPhase::Translating);
        let outbound = translator::translate(&self.settings, request)?;

        phase.advance(RequestPhase::Executing);
        let upstream = match self.executor.execute(outbound, &self.settings).await {
            Ok(upstream) => upstream,
            Err(e) => {
                phase.advance(RequestPhase::Aborted);
                return Err(e);
            }
        };

        phase.advance(RequestPhase::Relaying);
        Ok(relay::relay(upstream, self.settings.chunk_size, phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ForwardSettings::default();
        assert!(settings.allows(&Method::GET));
        assert!(settings.allows(&Method::POST));
        assert!(settings.allows(&Method::PUT));
        assert!(settings.allows(&Method::DELETE));
        assert!(!settings.allows(&Method::PATCH));
        assert!(!settings.allows(&Method::TRACE));
    }

    #[test]
    fn test_connect_and_trace_never_allowed() {
        let mut config = ProxyConfig::default();
        config.forwarding.allowed_methods = vec!["get".into(), "TRACE".into(), "CONNECT".into(), "patch".into()];

        let settings = ForwardSettings::from_config(&config);
        assert_eq!(settings.allowed_methods, vec![Method::GET, Method::PATCH]);
    }

    #[test]
    fn test_phase_transitions_are_forward_only() {
        use RequestPhase::*;
        assert!(Received.can_advance_to(Translating));
        assert!(Executing.can_advance_to(Aborted));
        assert!(Relaying.can_advance_to(Aborted));
        assert!(!Translating.can_advance_to(Aborted));
        assert!(!Relaying.can_advance_to(Executing));
        assert!(!Completed.can_advance_to(Aborted));
        assert!(!Received.can_advance_to(Relaying));
        assert!(Completed.is_terminal() && Aborted.is_terminal());
    }

    #[test]
    fn test_tracker_follows_happy_path() {
        let mut tracker = PhaseTracker::new();
        for next in [
            RequestPhase::Translating,
            RequestPhase::Executing,
            RequestPhase::Relaying,
            RequestPhase::Completed,
        ] {
            tracker.advance(next);
        }
        assert_eq!(tracker.phase(), RequestPhase::Completed);
    }
}
