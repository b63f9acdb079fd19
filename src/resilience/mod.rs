//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (connect deadline, total response deadline)
//!     → On connect failure: retries.rs (idempotent method? retries enabled?)
//!     → backoff.rs (jittered delay before the single retry)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Retries only for idempotent requests, and only before a byte was sent
//! - At most one retry, always against the same origin

pub mod backoff;
pub mod retries;
pub mod timeouts;
