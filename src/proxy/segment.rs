//! Range-aware segment streaming.
//!
//! A pass-through with three hard requirements: the client's `Range`
//! header reaches the upstream verbatim, partial-content status and
//! headers come back untouched, and the body is piped without buffering.
//! Encryption keys ride this same path; they are small and an unmodified
//! pass-through is exactly right for them.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use reqwest::Client;
use url::Url;

use crate::errors::ProxyResult;
use crate::services::{CachedSegment, HostPolicy, SegmentCache};
use crate::web::cors;

use super::{classify_upstream_status, upstream_headers};

/// Content type assumed when the upstream does not name one.
pub const DEFAULT_SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// One segment request, fully vetted by the dispatcher.
pub struct SegmentRequest {
    /// Canonical upstream segment (or key) URL.
    pub url: Url,
    /// Caller header overrides, Referer already repaired.
    pub caller_headers: HeaderMap,
    /// The client's `Range` header, forwarded verbatim when present.
    pub range: Option<HeaderValue>,
}

/// Stream a segment from the upstream to the client.
pub async fn serve_segment(
    client: &Client,
    policy: &HostPolicy,
    cache: &SegmentCache,
    timeout: Duration,
    default_user_agent: &str,
    request: &SegmentRequest,
) -> ProxyResult<Response> {
    if request.range.is_none()
        && let Some(hit) = cache.get(request.url.as_str()).await
    {
        return Ok(cached_response(hit));
    }

    let host = request.url.host_str().unwrap_or_default();
    let mut headers = upstream_headers(policy, host, &request.caller_headers, default_user_agent);
    if let Some(range) = &request.range {
        headers.insert(header::RANGE, range.clone());
    }

    let upstream = client
        .get(request.url.clone())
        .headers(headers)
        .timeout(timeout)
        .send()
        .await?;

    if let Some(error) = classify_upstream_status(upstream.status()) {
        return Err(error);
    }

    let partial = upstream.status() == StatusCode::PARTIAL_CONTENT;
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    // CORS lands before any content header so browsers expose the
    // response even when the stream is cut short.
    let mut response_headers = HeaderMap::new();
    cors::apply(&mut response_headers);

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_SEGMENT_CONTENT_TYPE));
    response_headers.insert(header::CONTENT_TYPE, content_type.clone());

    for name in [
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
    ] {
        if let Some(value) = upstream.headers().get(&name) {
            response_headers.insert(name, value.clone());
        }
    }

    // Complete responses may populate the optional segment cache; range
    // responses never do.
    if cache.is_enabled() && request.range.is_none() && !partial {
        let content_type = content_type
            .to_str()
            .unwrap_or(DEFAULT_SEGMENT_CONTENT_TYPE)
            .to_string();
        let body = upstream.bytes().await?;
        cache
            .insert(
                request.url.as_str().to_string(),
                CachedSegment {
                    content_type,
                    body: body.clone(),
                },
            )
            .await;
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        return Ok(assemble(status, response_headers, Body::from(body)));
    }

    Ok(assemble(
        status,
        response_headers,
        Body::from_stream(upstream.bytes_stream()),
    ))
}

fn cached_response(segment: CachedSegment) -> Response {
    let mut headers = HeaderMap::new();
    cors::apply(&mut headers);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&segment.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_SEGMENT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(segment.body.len()));
    headers.insert(
        HeaderName::from_static("x-cache"),
        HeaderValue::from_static("HIT"),
    );
    assemble(StatusCode::OK, headers, Body::from(segment.body))
}

fn assemble(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
