//! Web handlers module
//!
//! HTTP request handlers organized by endpoint. Handlers stay thin:
//! parse inputs, vet the URL, delegate to the proxy/service layer, and
//! account the outcome.

pub mod health;
pub mod manifest;
pub mod metrics;
pub mod resolve;
pub mod segment;
pub mod status;
pub mod subtitle;

use axum::Json;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use url::Url;

use crate::errors::{ProxyError, ProxyResult};
use crate::utils::UrlSafety;
use crate::web::{AppState, cors};

/// Safety check, canonicalization and allowlisting in one step. Every
/// upstream URL a handler acts on has passed through here.
pub(crate) fn vet_url(state: &AppState, raw: &str) -> ProxyResult<Url> {
    UrlSafety::validate_safety(raw)?;
    let url = UrlSafety::normalize(raw)?;
    let host = url.host_str().unwrap_or_default();
    if !state.policy.is_allowed(host) {
        return Err(ProxyError::host_not_allowed(host));
    }
    Ok(url)
}

/// Authority used for base-URL derivation when the client sent no Host
/// header.
pub(crate) fn fallback_authority(state: &AppState) -> String {
    format!("{}:{}", state.config.web.host, state.config.web.port)
}

/// Unmatched routes: preflights still get their 204, everything else a
/// 404 envelope with CORS.
pub async fn fallback(method: Method, uri: Uri) -> Response {
    if method == Method::OPTIONS {
        return cors::preflight();
    }

    let mut response = (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "code": "NOT_FOUND",
            "message": format!("no route for {}", uri.path()),
        })),
    )
        .into_response();
    cors::apply(response.headers_mut());
    response
}
