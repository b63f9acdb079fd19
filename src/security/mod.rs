//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → http::request (extract target URL)
//!     → validator.rs (scheme, host, port, private address checks)
//!     → Accept: hand to the forwarder
//!     → Reject: 403, upstream never contacted
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any policy check failure
//! - No trust in client input; forwarding headers are rebuilt by the translator
//! - Caller authentication is out of scope for the proxy endpoint

pub mod validator;

pub use validator::{AllowAll, AllowListValidator, UrlValidator, Verdict};
