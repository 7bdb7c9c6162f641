//! HTTP middleware
//!
//! Cross-cutting concerns for every endpoint: CORS (including preflight
//! short-circuiting), per-client throttling, and the total-request
//! deadline. Layered so that preflights are answered before the
//! throttler runs, and the deadline wraps only actual dispatch.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::errors::ProxyError;
use crate::utils::client_identifier;

use super::AppState;
use super::cors;
use super::responses::error_response;

/// Answer CORS preflights and stamp the CORS header set on every other
/// response, error paths included.
pub async fn cors_middleware(method: Method, request: Request, next: Next) -> Response {
    if method == Method::OPTIONS {
        return cors::preflight();
    }

    let mut response = next.run(request).await;
    cors::apply(response.headers_mut());
    response
}

/// Sliding-window admission per client identifier.
pub async fn throttle_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_identifier(request.headers(), peer);

    match state.throttler.check(&client).await {
        Ok(()) => next.run(request).await,
        Err(error) => {
            warn!(client = %client, "request rejected by throttler");
            error_response(&error)
        }
    }
}

/// Total-request deadline. Handlers that produce streaming bodies return
/// as soon as their headers are established, so long-running media
/// streams are not cut off; only stalled dispatch trips this.
pub async fn timeout_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let deadline = state.config.web.request_timeout;
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("request deadline elapsed before headers were sent");
            error_response(&ProxyError::Timeout)
        }
    }
}
