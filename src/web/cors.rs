//! The CORS header set.
//!
//! Every response this proxy produces, errors and timeouts included,
//! carries the same permissive header set, because the whole point of
//! the proxy is letting browser players fetch cross-origin media.
//! Insertion is idempotent so layers closer to the handler can establish
//! headers first without the middleware overwriting them.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;

pub const ALLOW_METHODS: &str = "GET, HEAD, OPTIONS";
pub const ALLOW_HEADERS: &str =
    "Content-Type, Range, Accept, Origin, Referer, User-Agent, Authorization, X-Requested-With";
pub const EXPOSE_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges, Content-Type";
pub const MAX_AGE: &str = "86400";

/// Add the full CORS header set, leaving already-present values alone.
pub fn apply(headers: &mut HeaderMap) {
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSE_HEADERS),
    );
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("false"),
    );
    insert_if_absent(
        headers,
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(MAX_AGE),
    );
}

fn insert_if_absent(headers: &mut HeaderMap, name: HeaderName, value: HeaderValue) {
    headers.entry(name).or_insert(value);
}

/// The 204 answer to any CORS preflight.
pub fn preflight() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    apply(response.headers_mut());
    response
}
