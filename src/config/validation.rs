//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0, addresses parse)
//! - Reject methods the proxy can never forward
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::Method;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("listener.context_path must start with '/' (got '{0}')")]
    ContextPath(String),

    #[error("forwarding.allowed_methods: '{0}' is not a forwardable method")]
    Method(String),

    #[error("target_policy.allowed_schemes: unsupported scheme '{0}'")]
    Scheme(String),

    #[error("pool.max_idle_per_host ({idle}) exceeds pool.max_connections_per_host ({max})")]
    IdleAboveMax { idle: usize, max: usize },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    Backoff { base: u64, max: u64 },

    #[error("admin.api_key must not be empty when the admin API is enabled")]
    AdminKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::AdminKey);
        }
    }

    if !config.listener.context_path.starts_with('/') {
        errors.push(ValidationError::ContextPath(config.listener.context_path.clone()));
    }

    let positive = [
        ("upstream.connect_timeout_ms", config.upstream.connect_timeout_ms),
        ("upstream.response_timeout_secs", config.upstream.response_timeout_secs),
        ("pool.idle_timeout_secs", config.pool.idle_timeout_secs),
        ("pool.acquire_timeout_ms", config.pool.acquire_timeout_ms),
        ("pool.max_connections_per_host", config.pool.max_connections_per_host as u64),
        ("forwarding.chunk_size", config.forwarding.chunk_size as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.pool.max_idle_per_host > config.pool.max_connections_per_host {
        errors.push(ValidationError::IdleAboveMax {
            idle: config.pool.max_idle_per_host,
            max: config.pool.max_connections_per_host,
        });
    }

    for name in &config.forwarding.allowed_methods {
        match Method::from_str(&name.to_ascii_uppercase()) {
            Ok(m) if m != Method::CONNECT && m != Method::TRACE => {}
            _ => errors.push(ValidationError::Method(name.clone())),
        }
    }

    for scheme in &config.target_policy.allowed_schemes {
        let lower = scheme.to_ascii_lowercase();
        if lower != "http" && lower != "https" {
            errors.push(ValidationError::Scheme(scheme.clone()));
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::Backoff {
            base: config.retries.base_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
