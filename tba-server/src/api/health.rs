//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tba_common::updater::WorkerCounts;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// "queued" or "synchronous"
    pub update_mode: String,
    /// Present only when the aggregate queue runs
    pub workers: Option<WorkerCounts>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let update_mode = match state.service.update_mode() {
        tba_common::config::UpdateMode::Queued => "queued",
        tba_common::config::UpdateMode::Synchronous => "synchronous",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "tba-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        update_mode: update_mode.to_string(),
        workers: state.service.worker_counts(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
