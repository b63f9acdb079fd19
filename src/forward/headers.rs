//! Header classification and filtering.
//!
//! # Responsibilities
//! - Classify header names as hop-by-hop, end-to-end or proxy-injected
//! - Strip hop-by-hop headers (including those named by `Connection`)
//! - Append forwarding markers (X-Forwarded-*, Via)
//!
//! # Design Decisions
//! - One process-wide table, read-only after initialization
//! - The same table filters requests and responses
//! - Inbound forwarding markers are not trusted unless configured

use std::net::IpAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Value this proxy appends to `Via`.
pub const VIA_VALUE: &str = "1.1 forward-proxy";

/// How a header is treated when forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderClass {
    /// Meaningful for a single connection only; dropped.
    HopByHop,
    /// Passed through unchanged.
    EndToEnd,
    /// Forwarding markers written by proxies.
    ProxyInjected,
}

static HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::TRANSFER_ENCODING,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    HeaderName::from_static("proxy-connection"),
];

static PROXY_INJECTED: [HeaderName; 4] = [X_FORWARDED_FOR, X_FORWARDED_PROTO, X_FORWARDED_HOST, header::VIA];

/// Classification table for header names.
#[derive(Debug)]
pub struct HeaderPolicy {
    hop_by_hop: &'static [HeaderName],
    proxy_injected: &'static [HeaderName],
}

/// The table used for every forwarded request and response.
pub static HEADER_POLICY: HeaderPolicy = HeaderPolicy {
    hop_by_hop: &HOP_BY_HOP,
    proxy_injected: &PROXY_INJECTED,
};

impl HeaderPolicy {
    pub fn classify(&self, name: &HeaderName) -> HeaderClass {
        if self.hop_by_hop.contains(name) {
            HeaderClass::HopByHop
        } else if self.proxy_injected.contains(name) {
            HeaderClass::ProxyInjected
        } else {
            HeaderClass::EndToEnd
        }
    }

    /// Copy `headers` without hop-by-hop headers.
    ///
    /// Headers listed as `Connection` tokens are dropped too. Proxy-injected
    /// headers survive only when `keep_injected` is set.
    pub fn filter(&self, headers: &HeaderMap, keep_injected: bool) -> HeaderMap {
        let named = connection_tokens(headers);
        let mut filtered = HeaderMap::with_capacity(headers.len());

        for (name, value) in headers {
            let keep = !named.contains(name)
                && match self.classify(name) {
                    HeaderClass::HopByHop => false,
                    HeaderClass::ProxyInjected => keep_injected,
                    HeaderClass::EndToEnd => true,
                };
            if keep {
                filtered.append(name.clone(), value.clone());
            }
        }

        filtered
    }
}

/// Header names listed in every `Connection` header value.
fn connection_tokens(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

/// Append `peer` to the `X-Forwarded-For` chain.
pub fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let chain = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");

    let value = if chain.is_empty() {
        peer.to_string()
    } else {
        format!("{}, {}", chain, peer)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Append this proxy to `Via`.
pub fn append_via(headers: &mut HeaderMap) {
    headers.append(header::VIA, HeaderValue::from_static(VIA_VALUE));
}
