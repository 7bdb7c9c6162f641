//! Segment proxy handler (`/ts-proxy`).
//!
//! Encryption keys use this endpoint too; the rewrite in the manifest
//! path points `#EXT-X-KEY` URIs here.

use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use serde::Deserialize;

use crate::errors::ProxyError;
use crate::metrics::{RequestCategory, RequestRecord};
use crate::proxy::segment::{SegmentRequest, serve_segment};
use crate::utils::{UrlSafety, parse_header_overrides, repair_referer};
use crate::web::AppState;
use crate::web::responses::{error_response, status_for};

use super::vet_url;

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub url: Option<String>,
    pub headers: Option<String>,
}

pub async fn segment(
    State(state): State<AppState>,
    query: Result<Query<SegmentQuery>, QueryRejection>,
    request_headers: HeaderMap,
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
    let host = canonical.host_str().unwrap_or_default().to_string();

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

    let request = SegmentRequest {
        url: canonical.clone(),
        caller_headers,
        range: request_headers.get(header::RANGE).cloned(),
    };

    let started = Instant::now();
    let result = serve_segment(
        &state.http_client,
        &state.policy,
        &state.segment_cache,
        state.config.upstream.request_timeout,
        &state.config.web.user_agent,
        &request,
    )
    .await;
    // Headers are established at this point; body streaming continues
    // past the recorded duration.
    let duration = started.elapsed();
    let sanitized = UrlSafety::sanitize_for_logging(canonical.as_str());

    match result {
        Ok(response) => {
            state
                .metrics
                .record(RequestRecord {
                    host: &host,
                    category: RequestCategory::Segment,
                    status: response.status().as_u16(),
                    success: true,
                    error_code: None,
                    duration,
                    sanitized_url: &sanitized,
                })
                .await;
            response
        }
        Err(error) => {
            let code = error.code();
            state
                .metrics
                .record(RequestRecord {
                    host: &host,
                    category: RequestCategory::Segment,
                    status: status_for(&error).as_u16(),
                    success: false,
                    error_code: Some(code.as_str()),
                    duration,
                    sanitized_url: &sanitized,
                })
                .await;
            error_response(&error)
        }
    }
}
