//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, context path, TLS).
    pub listener: ListenerConfig,

    /// Upstream connect and response deadlines.
    pub upstream: UpstreamConfig,

    /// Shared connection pool limits.
    pub pool: PoolConfig,

    /// Forwarding behaviour (methods, streaming, forwarding markers).
    pub forwarding: ForwardingConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Target URL policy.
    pub target_policy: TargetPolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Prefix under which the `/proxy` endpoint is mounted.
    pub context_path: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            context_path: "/http_proxy".to_string(),
            tls: None,
        }
    }
}

impl ListenerConfig {
    /// Full path of the proxy endpoint, e.g. `/http_proxy/proxy`.
    pub fn proxy_path(&self) -> String {
        format!("{}/proxy", self.context_path.trim_end_matches('/'))
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream deadline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Connection establishment timeout (DNS, TCP, TLS, handshake) in milliseconds.
    pub connect_timeout_ms: u64,

    /// Total time allowed for response head and body, in seconds.
    pub response_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            response_timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum connections (idle + checked out) per (scheme, host, port).
    pub max_connections_per_host: usize,

    /// Maximum idle connections retained per origin.
    pub max_idle_per_host: usize,

    /// Idle connections older than this are discarded, in seconds.
    pub idle_timeout_secs: u64,

    /// Maximum wait for a free connection slot, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 32,
            max_idle_per_host: 8,
            idle_timeout_secs: 90,
            acquire_timeout_ms: 2_000,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Forwarding behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Methods the proxy forwards. CONNECT and TRACE are always refused.
    pub allowed_methods: Vec<String>,

    /// Maximum size of a relayed response chunk in bytes.
    pub chunk_size: usize,

    /// Request bodies with a known length up to this size are sent buffered.
    pub buffer_threshold: usize,

    /// Add X-Forwarded-For / -Proto / -Host to outbound requests.
    pub add_forwarded_headers: bool,

    /// Keep inbound X-Forwarded-* values instead of replacing them.
    pub trust_forwarded_headers: bool,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            allowed_methods: ["GET", "POST", "PUT", "DELETE"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            chunk_size: 16 * 1024,
            buffer_threshold: 64 * 1024,
            add_forwarded_headers: true,
            trust_forwarded_headers: false,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry idempotent methods once when the upstream is unreachable.
    pub enabled: bool,

    /// Base delay for the backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for the backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 50,
            max_delay_ms: 500,
        }
    }
}

/// Target URL policy enforced before any translation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetPolicyConfig {
    /// Accepted URL schemes.
    pub allowed_schemes: Vec<String>,

    /// Accepted hosts; exact names or `*.suffix` wildcards. Empty allows any host.
    pub allowed_hosts: Vec<String>,

    /// Accepted ports. Empty allows any port.
    pub allowed_ports: Vec<u16>,

    /// Reject loopback, private, link-local and unspecified IP literals.
    pub deny_private_addresses: bool,
}

impl Default for TargetPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            allowed_hosts: Vec::new(),
            allowed_ports: Vec::new(),
            deny_private_addresses: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
