use axum::{extract::State, Json};
use tba_common::db::Category;

use crate::api::ApiError;
use crate::AppState;

/// GET /api/categories
///
/// All categories in display order.
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.service.list_categories().await?))
}
