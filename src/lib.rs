//! HTTP forwarding proxy library.
//!
//! A caller sends `{context_path}/proxy?url=<target>`; the proxy re-issues
//! the request to the target over a pooled HTTP/1.1 connection and streams
//! the upstream response back.

pub mod admin;
pub mod config;
pub mod error;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use forward::Forwarder;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
