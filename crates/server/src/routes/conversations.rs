use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::conversation::{
    Conversation, ConversationSummary, CreateConversation, CreateMessage, Message,
};
use services::services::conversations::MessageQuery;
use utils::{pagination::Pagination, response::ApiResponse};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

/// GET /api/conversations
/// Conversations visible to the caller, with last message and unread count.
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Vec<ConversationSummary>>>, ApiError> {
    let conversations = state.conversations().list(&actor, &pagination).await?;
    Ok(ResponseJson(ApiResponse::success(conversations)))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<CreateConversation>,
) -> Result<ResponseJson<ApiResponse<Conversation>>, ApiError> {
    let conversation = state.conversations().create(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(conversation)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Conversation>>, ApiError> {
    let conversation = state.conversations().get(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(conversation)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Message>>>, ApiError> {
    let messages = state.conversations().messages(&actor, id, &query).await?;
    Ok(ResponseJson(ApiResponse::success(messages)))
}

pub async fn post_message(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<CreateMessage>,
) -> Result<ResponseJson<ApiResponse<Message>>, ApiError> {
    let message = state
        .conversations()
        .post(&actor, id, &payload.body)
        .await?;
    Ok(ResponseJson(ApiResponse::success(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.conversations().mark_read(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/conversations",
        Router::new()
            .route("/", get(list_conversations).post(create_conversation))
            .route("/{id}", get(get_conversation))
            .route("/{id}/messages", get(list_messages).post(post_message))
            .route("/{id}/read", post(mark_read)),
    )
}
