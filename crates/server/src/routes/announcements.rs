use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::announcement::{
    Announcement, AnnouncementWithScopes, CreateAnnouncement, UpdateAnnouncement,
};
use services::services::announcements::AnnouncementQuery;
use utils::{pagination::Pagination, response::ApiResponse};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// GET /api/announcements/feed
/// Published announcements whose audience includes the caller.
pub async fn feed(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Vec<AnnouncementWithScopes>>>, ApiError> {
    let items = state.announcements().feed(&actor, &pagination).await?;
    Ok(ResponseJson(ApiResponse::success(items)))
}

/// GET /api/announcements
/// Staff view: every announcement inside the caller's area, any status.
pub async fn list_announcements(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<AnnouncementQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Vec<AnnouncementWithScopes>>>, ApiError> {
    let items = state
        .announcements()
        .list_managed(&actor, &query, &pagination)
        .await?;
    Ok(ResponseJson(ApiResponse::success(items)))
}

pub async fn create_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<CreateAnnouncement>,
) -> Result<ResponseJson<ApiResponse<AnnouncementWithScopes>>, ApiError> {
    let announcement = state.announcements().create(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(announcement)))
}

pub async fn get_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AnnouncementWithScopes>>, ApiError> {
    let announcement = state.announcements().get(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(announcement)))
}

pub async fn update_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateAnnouncement>,
) -> Result<ResponseJson<ApiResponse<AnnouncementWithScopes>>, ApiError> {
    let announcement = state.announcements().update(&actor, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(announcement)))
}

pub async fn delete_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.announcements().delete(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn publish_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Announcement>>, ApiError> {
    let announcement = state.announcements().publish(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(announcement)))
}

pub async fn archive_announcement(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Announcement>>, ApiError> {
    let announcement = state.announcements().archive(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(announcement)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/announcements",
        Router::new()
            .route("/", get(list_announcements).post(create_announcement))
            .route("/feed", get(feed))
            .route(
                "/{id}",
                get(get_announcement)
                    .put(update_announcement)
                    .delete(delete_announcement),
            )
            .route("/{id}/publish", post(publish_announcement))
            .route("/{id}/archive", post(archive_announcement)),
    )
}
