//! Upstream proxying: manifest rewriting and segment streaming.
//!
//! Both paths share the upstream status classification and the header
//! preparation rules: host-policy template first, caller overrides on
//! top, and a default User-Agent filled in when nobody supplied one.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};

use crate::errors::ProxyError;
use crate::services::HostPolicy;

pub mod manifest;
pub mod segment;

pub use manifest::{CacheStatus, ManifestRequest, RewrittenManifest, serve_manifest};
pub use segment::{SegmentRequest, serve_segment};

/// Route serving rewritten playlists.
pub const MANIFEST_ROUTE: &str = "m3u8-proxy";
/// Route serving segments and encryption keys.
pub const SEGMENT_ROUTE: &str = "ts-proxy";

/// Map a non-OK upstream status to its client-facing error.
///
/// 401 and 403 both fold to `UpstreamDenied` so the browser is never
/// prompted for credentials it does not have.
pub(crate) fn classify_upstream_status(status: StatusCode) -> Option<ProxyError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 | 403 => ProxyError::UpstreamDenied {
            status: status.as_u16(),
        },
        404 => ProxyError::NotFound,
        other => ProxyError::UpstreamStatus { status: other },
    })
}

/// Build the header set sent upstream for `host`.
pub(crate) fn upstream_headers(
    policy: &HostPolicy,
    host: &str,
    caller_headers: &HeaderMap,
    default_user_agent: &str,
) -> HeaderMap {
    let mut headers = policy.headers_for(host, caller_headers);
    if !headers.contains_key(header::USER_AGENT)
        && let Ok(value) = HeaderValue::from_str(default_user_agent)
    {
        headers.insert(header::USER_AGENT, value);
    }
    headers
}
