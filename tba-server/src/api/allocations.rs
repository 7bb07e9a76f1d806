//! Allocation submission and results endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tba_common::db::{AllocationInput, SubmissionHistory, SubmissionKey};
use tracing::debug;

use crate::api::{ApiError, VisitorIdentity};
use crate::AppState;

/// POST /api/allocations body
#[derive(Debug, Deserialize)]
pub struct SubmitAllocationRequest {
    pub allocations: Vec<AllocationInput>,
}

#[derive(Debug, Serialize)]
pub struct SubmitAllocationResponse {
    pub submission_key: SubmissionKey,
}

/// POST /api/allocations
///
/// Records one submission. Responds 201 with the new submission key, or 400
/// when the percentages are malformed or do not total exactly 100.
pub async fn submit_allocation(
    State(state): State<AppState>,
    VisitorIdentity(identity): VisitorIdentity,
    payload: Result<Json<SubmitAllocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitAllocationResponse>), ApiError> {
    let Json(request) = payload?;
    debug!(
        entries = request.allocations.len(),
        identified = identity.user_id.is_some(),
        "Allocation submitted"
    );

    let submission_key = state
        .service
        .submit_allocation(&request.allocations, &identity)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitAllocationResponse { submission_key }),
    ))
}

/// GET /api/allocations/:submission_key
pub async fn get_submission(
    State(state): State<AppState>,
    Path(submission_key): Path<String>,
) -> Result<Json<SubmissionHistory>, ApiError> {
    let key: SubmissionKey = submission_key
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid submission key: {}", submission_key)))?;

    Ok(Json(state.service.get_submission(&key).await?))
}
