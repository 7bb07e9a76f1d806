use axum::{extract::State, Json};
use tba_common::db::SubmissionHistory;

use crate::api::{ApiError, VisitorIdentity};
use crate::AppState;

/// GET /api/history
///
/// Past submissions of the calling visitor, most recent first. Anonymous
/// callers get an empty list.
pub async fn get_history(
    State(state): State<AppState>,
    VisitorIdentity(identity): VisitorIdentity,
) -> Result<Json<Vec<SubmissionHistory>>, ApiError> {
    let Some(user_id) = identity.user_id else {
        return Ok(Json(Vec::new()));
    };

    Ok(Json(state.service.get_submission_history(&user_id).await?))
}
