//! Request translation.
//!
//! # Responsibilities
//! - Check the method against the supported set
//! - Derive the pool key and the origin-form request target
//! - Build outbound headers: filtered, new `Host`, forwarding markers
//!
//! # Design Decisions
//! - Pure transform; nothing here touches the network or the body
//! - `Expect` is dropped because the inbound server already answered it

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use url::Url;

use crate::error::ProxyError;
use crate::forward::headers::{self, HEADER_POLICY, X_FORWARDED_HOST, X_FORWARDED_PROTO};
use crate::forward::{ForwardSettings, ProxyRequest};
use crate::pool::PoolKey;

/// A request ready to be written to an upstream connection.
pub struct OutboundRequest {
    pub key: PoolKey,
    pub method: Method,
    /// Origin-form target (`/path?query`).
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Body,
    /// Declared request body length, if any.
    pub content_length: Option<u64>,
}

/// Build the outbound request for `request`.
pub fn translate(settings: &ForwardSettings, request: ProxyRequest) -> Result<OutboundRequest, ProxyError> {
    let ProxyRequest {
        method,
        target,
        headers: inbound,
        body,
        peer,
        inbound_tls,
    } = request;

    if !settings.allows(&method) {
        return Err(ProxyError::UnsupportedMethod(method));
    }

    let key = PoolKey::from_url(&target)?;
    let uri = origin_form(&target)?;

    let mut outbound = HEADER_POLICY.filter(&inbound, settings.trust_forwarded_headers);
    outbound.remove(header::HOST);
    outbound.remove(header::EXPECT);

    let host = HeaderValue::from_str(&key.authority())
        .map_err(|e| ProxyError::InvalidTarget(format!("invalid host '{}': {}", key.host, e)))?;
    outbound.insert(header::HOST, host);

    if settings.add_forwarded_headers {
        if let Some(peer) = peer {
            headers::append_forwarded_for(&mut outbound, peer.ip());
        }
        let proto = if inbound_tls { "https" } else { "http" };
        outbound.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
        if let Some(inbound_host) = inbound.get(header::HOST) {
            outbound.insert(X_FORWARDED_HOST, inbound_host.clone());
        }
        headers::append_via(&mut outbound);
    }

    let content_length = outbound
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    Ok(OutboundRequest {
        key,
        method,
        uri,
        headers: outbound,
        body,
        content_length,
    })
}

/// Path and query of `target`; the fragment is never sent.
fn origin_form(target: &Url) -> Result<Uri, ProxyError> {
    let mut path_and_query = target.path().to_string();
    if path_and_query.is_empty() {
        path_and_query.push('/');
    }
    if let Some(query) = target.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Uri::try_from(path_and_query)
        .map_err(|e| ProxyError::InvalidTarget(format!("invalid request target in '{}': {}", target, e)))
}
