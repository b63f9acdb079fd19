//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request IDs (UUID v4)
//! - Extract the target URL from the `url` query parameter
//! - Read the request ID back for logging
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - A caller-supplied `x-request-id` is kept as is
//! - `url=` may carry a raw URL (its own query string survives) or a
//!   percent-encoded one

use axum::http::{HeaderName, Request, Uri};
use tower_http::request_id::{MakeRequestId, RequestId};
use url::Url;

use crate::error::ProxyError;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const TARGET_PARAM: &str = "url=";

/// Issues a fresh UUID v4 for requests that arrive without an ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        id.parse().ok().map(RequestId::new)
    }
}

/// Request ID of `request`, or `"unknown"` when none was attached.
pub fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Resolve the absolute target URL carried by `uri`.
///
/// Everything after the first `url=` parameter is the target. When that text
/// already contains `://` it is taken verbatim, otherwise it is
/// percent-decoded first.
pub fn extract_target(uri: &Uri) -> Result<Url, ProxyError> {
    let query = uri
        .query()
        .ok_or_else(|| ProxyError::InvalidTarget("missing 'url' query parameter".to_string()))?;

    let raw = query
        .split('&')
        .scan(0usize, |offset, param| {
            let start = *offset;
            *offset += param.len() + 1;
            Some((start, param))
        })
        .find(|(_, param)| param.starts_with(TARGET_PARAM))
        .map(|(start, _)| &query[start + TARGET_PARAM.len()..])
        .ok_or_else(|| ProxyError::InvalidTarget("missing 'url' query parameter".to_string()))?;

    if raw.is_empty() {
        return Err(ProxyError::InvalidTarget("empty 'url' query parameter".to_string()));
    }

    let decoded: String = if raw.contains("://") {
        raw.to_string()
    } else {
        url::form_urlencoded::parse(format!("u={}", raw).as_bytes())
            .next()
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default()
    };

    let target = Url::parse(&decoded)
        .map_err(|e| ProxyError::InvalidTarget(format!("'{}' is not an absolute URL: {}", decoded, e)))?;

    match target.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::InvalidTarget(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    }
    if target.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::InvalidTarget(format!("'{}' has no host", decoded)));
    }

    Ok(target)
}
