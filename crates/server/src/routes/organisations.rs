use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    member::Member,
    organisation::{CreateOrganisation, Organisation, OrganisationWithCount, UpdateOrganisation},
};
use services::services::organisations::OrganisationQuery;
use utils::{
    pagination::{Page, Pagination},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, auth::AuthUser, error::ApiError};

pub async fn list_organisations(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Query(query): Query<OrganisationQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<OrganisationWithCount>>>, ApiError> {
    let page = state
        .organisations()
        .list(&actor, &query, &pagination)
        .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub async fn get_organisation(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Organisation>>, ApiError> {
    let organisation = state.organisations().get(id).await?;
    Ok(ResponseJson(ApiResponse::success(organisation)))
}

pub async fn create_organisation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    axum::Json(payload): axum::Json<CreateOrganisation>,
) -> Result<ResponseJson<ApiResponse<Organisation>>, ApiError> {
    let organisation = state.organisations().create(&actor, payload).await?;
    Ok(ResponseJson(ApiResponse::success(organisation)))
}

pub async fn update_organisation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateOrganisation>,
) -> Result<ResponseJson<ApiResponse<Organisation>>, ApiError> {
    let organisation = state.organisations().update(&actor, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(organisation)))
}

/// DELETE /api/organisations/{id}
/// Refused with 409 while members still reference the organisation.
pub async fn delete_organisation(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.organisations().delete(&actor, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn list_organisation_members(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<ResponseJson<ApiResponse<Page<Member>>>, ApiError> {
    let page = state
        .organisations()
        .members(&actor, id, &pagination)
        .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub fn router(_state: &AppState) -> Router<AppState> {
    Router::new().nest(
        "/organisations",
        Router::new()
            .route("/", get(list_organisations).post(create_organisation))
            .route(
                "/{id}",
                get(get_organisation)
                    .put(update_organisation)
                    .delete(delete_organisation),
            )
            .route("/{id}/members", get(list_organisation_members)),
    )
}
