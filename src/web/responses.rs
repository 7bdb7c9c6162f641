//! Error translation for the web layer.
//!
//! Components surface [`ProxyError`] values; this module turns them into
//! the wire envelope `{code, message, hint, ...}` with the right HTTP
//! status and the CORS header set that every response carries.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::errors::ProxyError;

use super::cors;

/// JSON error envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn from_error(error: &ProxyError) -> Self {
        let mut code = error.code();

        // Unclassified faults may still smuggle a machine code through a
        // `CODE:` message prefix; surface that instead of the generic one.
        if let ProxyError::Internal { message } = error
            && let Some(prefixed) = code_from_message(message)
        {
            code = prefixed.to_string();
        }

        Self {
            code,
            message: error.to_string(),
            hint: hint_for(error).map(str::to_string),
            host: match error {
                ProxyError::HostNotAllowed { host } => Some(host.clone()),
                _ => None,
            },
            retry_after: match error {
                ProxyError::RateLimited { retry_after } => Some(*retry_after),
                _ => None,
            },
        }
    }
}

/// HTTP status for each error category. Upstream statuses outside the
/// taxonomy pass through unchanged.
pub fn status_for(error: &ProxyError) -> StatusCode {
    match error {
        ProxyError::UrlMalformed { .. } => StatusCode::BAD_REQUEST,
        ProxyError::HostNotAllowed { .. } => StatusCode::FORBIDDEN,
        ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ProxyError::UpstreamDenied { .. } => StatusCode::FORBIDDEN,
        ProxyError::NotFound => StatusCode::NOT_FOUND,
        ProxyError::UpstreamStatus { status } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ProxyError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
        ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Extract a leading `CODE:` prefix from a message, if the prefix looks
/// like a machine code (`UPPER_SNAKE`).
pub fn code_from_message(message: &str) -> Option<&str> {
    let (prefix, _) = message.split_once(':')?;
    let prefix = prefix.trim();
    let shaped = !prefix.is_empty()
        && prefix.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && prefix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    shaped.then_some(prefix)
}

/// Build the enveloped error response, CORS included.
pub fn error_response(error: &ProxyError) -> Response {
    let mut response =
        (status_for(error), Json(ErrorBody::from_error(error))).into_response();
    cors::apply(response.headers_mut());
    response
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error_response(&self)
    }
}

fn hint_for(error: &ProxyError) -> Option<&'static str> {
    match error {
        ProxyError::UrlMalformed { .. } => {
            Some("pass a single absolute http(s) URL in the url parameter")
        }
        ProxyError::HostNotAllowed { .. } => {
            Some("this upstream host is not on the proxy allowlist")
        }
        ProxyError::RateLimited { .. } => Some("retry after the indicated number of seconds"),
        ProxyError::UpstreamDenied { .. } => {
            Some("the origin refused the request; check the forwarded Referer and Origin headers")
        }
        ProxyError::BadGateway { .. } => Some("the upstream could not be reached"),
        ProxyError::Timeout => Some("the upstream did not answer in time"),
        _ => None,
    }
}
