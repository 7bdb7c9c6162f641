//! Provider-string resolution endpoint (`POST /resolve`).

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::errors::ProxyError;
use crate::utils::parse_header_overrides;
use crate::web::responses::error_response;
use crate::web::{AppState, cors};

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub url: Option<String>,
    pub headers: Option<serde_json::Value>,
}

pub async fn resolve(
    State(state): State<AppState>,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error_response(&ProxyError::url_malformed(
            "request body must be a JSON object",
        ));
    };
    let Some(input) = body.url else {
        return error_response(&ProxyError::url_malformed("missing url field"));
    };

    let caller_headers = match body
        .headers
        .as_ref()
        .map(|headers| parse_header_overrides(&headers.to_string()))
        .transpose()
    {
        Ok(headers) => headers.unwrap_or_else(HeaderMap::new),
        Err(error) => return error_response(&error),
    };

    match state
        .resolver
        .resolve(&input, &caller_headers, &state.policy)
        .await
    {
        Ok(url) => {
            let mut response = Json(serde_json::json!({
                "url": url.as_str(),
                "resolved": true,
            }))
            .into_response();
            cors::apply(response.headers_mut());
            response
        }
        Err(error) => error_response(&error),
    }
}
