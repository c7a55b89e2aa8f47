use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::member::{CreateMember, Member, UpdateMember};
use services::services::members::{MemberQuery, StatusChange};
use utils::{
    pagination::{Page, Pagination},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// GET /api/members
/// Member directory, limited to the caller's area.
pub async fn list_members(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<MemberQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<Member>>>, ApiError> {
    let page = state.members().list(&actor, query, &pagination).await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub async fn get_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().get(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn create_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<CreateMember>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().create(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn update_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateMember>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().update(&actor, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn delete_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.members().delete(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

/// POST /api/members/{id}/validate
/// Pending to validated; assigns the membership number.
pub async fn validate_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().validate(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn reject_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<StatusChange>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().reject(&actor, id, payload.reason).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn suspend_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<StatusChange>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().suspend(&actor, id, payload.reason).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn reinstate_member(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = state.members().reinstate(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/members",
        Router::new()
            .route("/", get(list_members).post(create_member))
            .route(
                "/{id}",
                get(get_member).put(update_member).delete(delete_member),
            )
            .route("/{id}/validate", post(validate_member))
            .route("/{id}/reject", post(reject_member))
            .route("/{id}/suspend", post(suspend_member))
            .route("/{id}/reinstate", post(reinstate_member)),
    )
}
