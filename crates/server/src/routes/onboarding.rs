use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::onboarding::{
    OnboardingSubmission, OnboardingSubmissionWithMember, ReviewOnboarding, SubmitOnboarding,
};
use services::services::onboarding::SubmissionQuery;
use utils::{
    pagination::{Page, Pagination},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// POST /api/onboarding
/// Creates a pending member for the caller and records the form answers.
pub async fn submit(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<SubmitOnboarding>,
) -> Result<ResponseJson<ApiResponse<OnboardingSubmission>>, ApiError> {
    let submission = state.onboarding().submit(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(submission)))
}

pub async fn my_submission(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<ResponseJson<ApiResponse<OnboardingSubmission>>, ApiError> {
    let submission = state.onboarding().mine(&actor).await?;
    Ok(ResponseJson(ApiResponse::success(submission)))
}

pub async fn list_submissions(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<SubmissionQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<OnboardingSubmissionWithMember>>>, ApiError> {
    let page = state.onboarding().list(&actor, &query, &pagination).await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub async fn review_submission(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<ReviewOnboarding>,
) -> Result<ResponseJson<ApiResponse<OnboardingSubmission>>, ApiError> {
    let submission = state.onboarding().review(&actor, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(submission)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/onboarding",
        Router::new()
            .route("/", post(submit))
            .route("/me", get(my_submission))
            .route("/submissions", get(list_submissions))
            .route("/submissions/{id}/review", post(review_submission)),
    )
}
