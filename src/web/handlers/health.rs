//! Health check HTTP handler.

use axum::Json;
use axum::response::IntoResponse;

/// Liveness probe; the proxy keeps no external dependencies to check.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
    }))
}
