use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::geography::{Commune, Prefecture, Region};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

pub async fn list_regions(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<ResponseJson<ApiResponse<Vec<Region>>>, ApiError> {
    let regions = Region::find_all(&state.db().pool).await?;
    Ok(ResponseJson(ApiResponse::success(regions)))
}

pub async fn list_prefectures(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(region_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<Prefecture>>>, ApiError> {
    let prefectures = Prefecture::find_by_region(&state.db().pool, region_id).await?;
    Ok(ResponseJson(ApiResponse::success(prefectures)))
}

pub async fn list_communes(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(prefecture_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<Commune>>>, ApiError> {
    let communes = Commune::find_by_prefecture(&state.db().pool, prefecture_id).await?;
    Ok(ResponseJson(ApiResponse::success(communes)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/geography",
        Router::new()
            .route("/regions", get(list_regions))
            .route("/regions/{id}/prefectures", get(list_prefectures))
            .route("/prefectures/{id}/communes", get(list_communes)),
    )
}
