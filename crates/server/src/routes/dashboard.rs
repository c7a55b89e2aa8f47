use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use db::models::dashboard::DashboardSummary;
use utils::response::ApiResponse;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// GET /api/dashboard
pub async fn summary(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<ResponseJson<ApiResponse<DashboardSummary>>, ApiError> {
    let summary = state.dashboard().summary(&actor).await?;
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/dashboard", get(summary))
}
