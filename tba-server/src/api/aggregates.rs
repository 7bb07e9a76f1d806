use axum::{extract::State, Json};
use tba_common::db::AggregateReport;

use crate::api::ApiError;
use crate::AppState;

/// GET /api/aggregates
///
/// Site-wide average allocation per category plus total submissions. May
/// lag the most recent submissions by one update cycle.
pub async fn get_aggregates(
    State(state): State<AppState>,
) -> Result<Json<AggregateReport>, ApiError> {
    Ok(Json(state.service.get_aggregates().await?))
}
