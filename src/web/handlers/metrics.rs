//! Metrics and cache maintenance handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::metrics::HostReport;
use crate::services::CacheStats;
use crate::web::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDocument {
    pub global: HostReport,
    pub hosts: BTreeMap<String, HostReport>,
    pub playlist_cache: CacheStats,
}

/// `GET /proxy/metrics`: the full per-host snapshot plus cache counters.
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot().await;
    Json(MetricsDocument {
        global: snapshot.global,
        hosts: snapshot.hosts,
        playlist_cache: state.playlist_cache.stats().await,
    })
}

/// `POST /proxy/metrics/reset`: the only way counters ever go down.
pub async fn reset_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.reset().await;
    Json(serde_json::json!({ "reset": true }))
}

/// `POST /proxy/cache/flush`: drop every cached playlist.
pub async fn flush_playlist_cache(State(state): State<AppState>) -> impl IntoResponse {
    let flushed = state.playlist_cache.flush().await;
    Json(serde_json::json!({ "flushed": flushed }))
}
