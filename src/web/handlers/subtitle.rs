//! Subtitle pass-through (`/sub-proxy`).
//!
//! Subtitles are small and immutable in practice, so unlike playlists
//! they are served with a long public cache lifetime.

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use serde::Deserialize;

use crate::errors::ProxyError;
use crate::proxy::{classify_upstream_status, upstream_headers};
use crate::utils::{parse_header_overrides, repair_referer};
use crate::web::responses::error_response;
use crate::web::{AppState, cors};

use super::vet_url;

const DEFAULT_SUBTITLE_CONTENT_TYPE: &str = "text/vtt";
const SUBTITLE_CACHE_CONTROL: &str = "public, max-age=3600";

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    pub url: Option<String>,
    pub headers: Option<String>,
}

pub async fn subtitle(
    State(state): State<AppState>,
    query: Result<Query<SubtitleQuery>, QueryRejection>,
    _request_headers: HeaderMap,
) -> Response {
    let Ok(Query(query)) = query else {
        return error_response(&ProxyError::url_malformed("unparseable query string"));
    };
    let Some(raw_url) = query.url else {
        return error_response(&ProxyError::url_malformed("missing url parameter"));
    };

    let canonical = match vet_url(&state, &raw_url) {
        Ok(url) => url,
        Err(error) => return error_response(&error),
    };

    let mut caller_headers = match query
        .headers
        .as_deref()
        .map(parse_header_overrides)
        .transpose()
    {
        Ok(headers) => headers.unwrap_or_default(),
        Err(error) => return error_response(&error),
    };
    repair_referer(&mut caller_headers);

    let host = canonical.host_str().unwrap_or_default();
    let headers = upstream_headers(
        &state.policy,
        host,
        &caller_headers,
        &state.config.web.user_agent,
    );

    let upstream = match state
        .http_client
        .get(canonical)
        .headers(headers)
        .timeout(state.config.upstream.request_timeout)
        .send()
        .await
    {
        Ok(upstream) => upstream,
        Err(error) => return error_response(&error.into()),
    };

    if let Some(error) = classify_upstream_status(upstream.status()) {
        return error_response(&error);
    }

    let mut response_headers = HeaderMap::new();
    cors::apply(&mut response_headers);
    response_headers.insert(
        header::CONTENT_TYPE,
        upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_SUBTITLE_CONTENT_TYPE)),
    );
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(SUBTITLE_CACHE_CONTROL),
    );
    if let Some(length) = upstream.headers().get(header::CONTENT_LENGTH) {
        response_headers.insert(header::CONTENT_LENGTH, length.clone());
    }

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.headers_mut() = response_headers;
    response
}
