//! Timeout enforcement.
//!
//! # Responsibilities
//! - Turn a configured duration into an absolute deadline
//! - Race a future against a deadline and name the phase that expired
//!
//! # Design Decisions
//! - Uses Tokio's timer; an expired future is dropped, which cancels it
//! - The response deadline is absolute so the head wait and the body relay
//!   share one budget

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ProxyError, TimeoutPhase};

/// Absolute deadline `timeout` from now.
pub fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

/// Await `future`, failing with `UpstreamTimeout(phase)` once `deadline` passes.
pub async fn with_deadline<F, T>(deadline: Instant, phase: TimeoutPhase, future: F) -> Result<T, ProxyError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(deadline, future)
        .await
        .map_err(|_| ProxyError::UpstreamTimeout(phase))
}
