//! tba-server library - HTTP surface of the tax budget allocator
//!
//! Thin axum handlers over [`AllocationService`]; all allocation logic lives
//! in `tba-common`.

use axum::Router;
use std::sync::Arc;
use tba_common::AllocationService;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod logging;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AllocationService>,
}

impl AppState {
    pub fn new(service: Arc<AllocationService>) -> Self {
        Self { service }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/categories", get(api::list_categories))
        .route("/api/allocations", post(api::submit_allocation))
        .route("/api/allocations/:submission_key", get(api::get_submission))
        .route("/api/aggregates", get(api::get_aggregates))
        .route("/api/history", get(api::get_history));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
