use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use db::models::support_chat::SupportChatMessage;
use services::services::support_chat::{AskSupport, SupportReply};
use utils::response::ApiResponse;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// POST /api/support/chat
/// Answers with 503 when no assistant API key is configured.
pub async fn ask(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<AskSupport>,
) -> Result<ResponseJson<ApiResponse<SupportReply>>, ApiError> {
    let reply = state.support().ask(&actor, &payload.message).await?;
    Ok(ResponseJson(ApiResponse::success(reply)))
}

pub async fn history(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<ResponseJson<ApiResponse<Vec<SupportChatMessage>>>, ApiError> {
    let messages = state.support().history(&actor).await?;
    Ok(ResponseJson(ApiResponse::success(messages)))
}

pub async fn clear(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
) -> Result<ResponseJson<ApiResponse<u64>>, ApiError> {
    let deleted = state.support().clear(&actor).await?;
    Ok(ResponseJson(ApiResponse::success(deleted)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().route("/support/chat", get(history).post(ask).delete(clear))
}
