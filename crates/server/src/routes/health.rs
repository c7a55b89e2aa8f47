use axum::{Router, extract::State, response::Json as ResponseJson, routing::get};
use serde::Serialize;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize, TS)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, TS)]
pub struct DatabaseHealth {
    pub status: String,
    pub applied_migrations: i64,
}

/// GET /api/health
pub async fn health() -> ResponseJson<ApiResponse<HealthStatus>> {
    ResponseJson(ApiResponse::success(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// GET /api/health/db
pub async fn database_health(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<DatabaseHealth>>, ApiError> {
    let applied_migrations = state.db().applied_migrations().await?;
    Ok(ResponseJson(ApiResponse::success(DatabaseHealth {
        status: "ok".to_string(),
        applied_migrations,
    })))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/health",
        Router::new()
            .route("/", get(health))
            .route("/db", get(database_health)),
    )
}
