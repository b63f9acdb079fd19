//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, proxy handler)
//!     → request.rs (request ID, target URL extraction)
//!     → [forward engine: translate, execute, relay]
//!     → response.rs (metrics, outcome log, error rendering)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{extract_target, MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ServerError};
