//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound (optional):
//!     listener.tls configured
//!     → tls.rs (load certificate chain and key)
//!     → axum-server rustls acceptor
//!
//! Outbound:
//!     pool::connector dials upstream origins (rustls client side)
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently by the server
//! - Missing files are reported before rustls sees them

pub mod tls;
