//! Playlist proxy handlers (`/m3u8-proxy` GET/POST, `/proxy/hls`).
//!
//! All three entry points funnel into the same pipeline: vet the URL,
//! parse and repair caller headers, serve through the cache, account the
//! outcome. The GET form carries inputs in the query string, the POST
//! form in a JSON body, and `/proxy/hls` names its URL parameter `link`.

use std::time::Instant;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum::response::Response;
use serde::Deserialize;

use crate::errors::ProxyError;
use crate::metrics::{RequestCategory, RequestRecord};
use crate::proxy::manifest::{
    HLS_CONTENT_TYPE, ManifestRequest, RewrittenManifest, serve_manifest,
};
use crate::utils::{UrlSafety, derive_base_url, parse_header_overrides, repair_referer};
use crate::web::responses::{error_response, status_for};
use crate::web::{AppState, cors};

use super::{fallback_authority, vet_url};

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    pub url: Option<String>,
    /// JSON-encoded header object, e.g. `{"Referer":"https://…"}`.
    pub headers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HlsQuery {
    pub link: Option<String>,
    pub headers: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestBody {
    pub url: Option<String>,
    pub headers: Option<serde_json::Value>,
}

pub async fn manifest_query(
    State(state): State<AppState>,
    query: Result<Query<ManifestQuery>, QueryRejection>,
    request_headers: HeaderMap,
) -> Response {
    let Ok(Query(query)) = query else {
        return error_response(&ProxyError::url_malformed("unparseable query string"));
    };
    proxy_manifest(&state, &request_headers, query.url, query.headers).await
}

pub async fn manifest_link(
    State(state): State<AppState>,
    query: Result<Query<HlsQuery>, QueryRejection>,
    request_headers: HeaderMap,
) -> Response {
    let Ok(Query(query)) = query else {
        return error_response(&ProxyError::url_malformed("unparseable query string"));
    };
    proxy_manifest(&state, &request_headers, query.link, query.headers).await
}

pub async fn manifest_body(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    body: Result<Json<ManifestBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error_response(&ProxyError::url_malformed(
            "request body must be a JSON object",
        ));
    };
    let headers_param = body.headers.as_ref().map(|headers| headers.to_string());
    proxy_manifest(&state, &request_headers, body.url, headers_param).await
}

async fn proxy_manifest(
    state: &AppState,
    request_headers: &HeaderMap,
    url_param: Option<String>,
    headers_param: Option<String>,
) -> Response {
    let Some(raw_url) = url_param else {
        return error_response(&ProxyError::url_malformed("missing url parameter"));
    };

    let canonical = match vet_url(state, &raw_url) {
        Ok(url) => url,
        Err(error) => return error_response(&error),
    };
    let host = canonical.host_str().unwrap_or_default().to_string();

    let mut caller_headers = match headers_param
        .as_deref()
        .map(parse_header_overrides)
        .transpose()
    {
        Ok(headers) => headers.unwrap_or_default(),
        Err(error) => return error_response(&error),
    };
    repair_referer(&mut caller_headers);

    let request = ManifestRequest {
        url: canonical.clone(),
        caller_headers,
        headers_param,
        server_base: derive_base_url(request_headers, &fallback_authority(state)),
    };

    let started = Instant::now();
    let result = serve_manifest(
        &state.http_client,
        &state.policy,
        &state.playlist_cache,
        state.config.upstream.request_timeout,
        &state.config.web.user_agent,
        &request,
    )
    .await;
    let duration = started.elapsed();
    let sanitized = UrlSafety::sanitize_for_logging(canonical.as_str());

    match result {
        Ok(manifest) => {
            state
                .metrics
                .record(RequestRecord {
                    host: &host,
                    category: RequestCategory::Manifest,
                    status: 200,
                    success: true,
                    error_code: None,
                    duration,
                    sanitized_url: &sanitized,
                })
                .await;
            manifest_response(manifest)
        }
        Err(error) => {
            let code = error.code();
            state
                .metrics
                .record(RequestRecord {
                    host: &host,
                    category: RequestCategory::Manifest,
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

fn manifest_response(manifest: RewrittenManifest) -> Response {
    let mut headers = HeaderMap::new();
    cors::apply(&mut headers);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(HLS_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(manifest.body.len()));
    headers.insert(
        HeaderName::from_static("x-cache"),
        HeaderValue::from_static(manifest.cache.as_str()),
    );

    let mut response = Response::new(Body::from(manifest.body));
    *response.headers_mut() = headers;
    response
}
