use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::email_campaign::{
    CampaignRecipient, CreateEmailCampaign, EmailCampaign, RecipientCounts, UpdateEmailCampaign,
};
use services::services::campaigns::{CampaignQuery, RecipientQuery, ScheduleCampaign};
use utils::{
    pagination::{Page, Pagination},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

pub async fn list_campaigns(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<CampaignQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<EmailCampaign>>>, ApiError> {
    let page = state.campaigns().list(&actor, &query, &pagination).await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub async fn create_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<CreateEmailCampaign>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().create(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().get(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

/// PUT /api/email-campaigns/{id}
/// Drafts only.
pub async fn update_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateEmailCampaign>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().update(&actor, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

pub async fn delete_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.campaigns().delete(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn schedule_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<ScheduleCampaign>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state
        .campaigns()
        .schedule(&actor, id, payload.scheduled_at)
        .await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

pub async fn unschedule_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().unschedule(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

/// POST /api/email-campaigns/{id}/send
/// Queues the audience and hands the campaign to the dispatcher.
pub async fn send_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().send_now(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

pub async fn retry_campaign(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<EmailCampaign>>, ApiError> {
    let campaign = state.campaigns().retry_failed(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(campaign)))
}

pub async fn campaign_stats(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<RecipientCounts>>, ApiError> {
    let counts = state.campaigns().stats(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(counts)))
}

pub async fn list_recipients(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<RecipientQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<CampaignRecipient>>>, ApiError> {
    let page = state
        .campaigns()
        .recipients(&actor, id, &query, &pagination)
        .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/email-campaigns",
        Router::new()
            .route("/", get(list_campaigns).post(create_campaign))
            .route(
                "/{id}",
                get(get_campaign).put(update_campaign).delete(delete_campaign),
            )
            .route("/{id}/schedule", post(schedule_campaign))
            .route("/{id}/unschedule", post(unschedule_campaign))
            .route("/{id}/send", post(send_campaign))
            .route("/{id}/retry", post(retry_campaign))
            .route("/{id}/stats", get(campaign_stats))
            .route("/{id}/recipients", get(list_recipients)),
    )
}
