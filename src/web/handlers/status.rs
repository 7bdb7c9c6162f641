//! Status endpoint (`GET /proxy/status`).
//!
//! Reports how the proxy sees the current request: which base URL it
//! would embed in rewritten manifests and which forwarding headers drove
//! that decision. Useful when debugging deployments behind load
//! balancers that mangle `X-Forwarded-Proto`.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::{CONNECTION_SCHEME, derive_base_url};
use crate::web::{AppState, cors};

use super::fallback_authority;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub user_agent: String,
    pub server_url: String,
    /// Scheme the proxy settled on for rewritten URLs.
    pub protocol: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_forwarded_proto: Option<String>,
    /// Scheme of the connection as this process saw it.
    pub req_protocol: String,
}

pub async fn proxy_status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let server_url = derive_base_url(&headers, &fallback_authority(&state));
    let protocol = server_url
        .split("://")
        .next()
        .unwrap_or(CONNECTION_SCHEME)
        .to_string();

    let body = StatusResponse {
        status: "ok",
        timestamp: Utc::now(),
        user_agent: state.config.web.user_agent.clone(),
        server_url,
        protocol,
        host: headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        x_forwarded_proto: headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        req_protocol: CONNECTION_SCHEME.to_string(),
    };

    let mut response = Json(body).into_response();
    cors::apply(response.headers_mut());
    response
}
