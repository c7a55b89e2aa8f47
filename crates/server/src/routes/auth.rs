use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::models::profile::{Profile, UpdateProfileRole};
use services::services::access::{self, AccessError, Actor};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// GET /api/auth/me
/// The caller's profile as the API sees it.
pub async fn me(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<ResponseJson<ApiResponse<Profile>>, ApiError> {
    let profile = Profile::find_by_id(&state.db().pool, actor.profile_id)
        .await?
        .ok_or(AccessError::ProfileNotFound)?;
    Ok(ResponseJson(ApiResponse::success(profile)))
}

/// GET /api/auth/actor
pub async fn actor(AuthUser(actor): AuthUser) -> ResponseJson<ApiResponse<Actor>> {
    ResponseJson(ApiResponse::success(actor))
}

/// PUT /api/profiles/{id}/role
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(profile_id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateProfileRole>,
) -> Result<ResponseJson<ApiResponse<Profile>>, ApiError> {
    let profile = access::assign_role(&state.db().pool, &actor, profile_id, &payload).await?;
    tracing::info!(
        profile_id = %profile.id,
        role = %profile.role,
        assigned_by = %actor.profile_id,
        "Profile role updated"
    );
    Ok(ResponseJson(ApiResponse::success(profile)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new()
        .nest(
            "/auth",
            Router::new()
                .route("/me", get(me))
                .route("/actor", get(actor)),
        )
        .route("/profiles/{id}/role", put(update_role))
}
