//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failed attempt may be repeated
//! - Compute the delay before the repeat
//!
//! # Design Decisions
//! - Only idempotent methods (GET, HEAD, PUT, DELETE, OPTIONS) qualify
//! - Only `UpstreamUnreachable` raised while connecting qualifies, so the
//!   request body has not been touched and no request byte reached upstream
//! - One retry at most; no retry budget is needed at that bound

use std::time::Duration;

use axum::http::Method;

use crate::config::RetryConfig;
use crate::error::ProxyError;
use crate::resilience::backoff::calculate_backoff;

/// Number of retries allowed after the first attempt.
pub const MAX_RETRIES: u32 = 1;

/// Idempotent per RFC 9110, minus TRACE which is never forwarded.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS
    )
}

/// Retry decision for connect-phase failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    enabled: bool,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    /// Never retries.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Whether attempt number `attempt` (1-based) failing with `error` may be repeated.
    pub fn should_retry(&self, method: &Method, error: &ProxyError, attempt: u32) -> bool {
        self.enabled
            && attempt <= MAX_RETRIES
            && is_idempotent(method)
            && matches!(error, ProxyError::UpstreamUnreachable(_))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}
