//! Bearer-token authentication for API handlers.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use db::models::profile::Profile;
use services::services::access::Actor;
use utils::jwt::bearer_token;

use crate::{AppState, error::ApiError};

/// Resolves the caller from `Authorization: Bearer <jwt>`. The profile is
/// created on first sign-in with the plain member role.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Actor);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(ApiError::Unauthorized)?;

        let claims = state.jwt().verify(token).inspect_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
        })?;
        let profile =
            Profile::find_or_create(&state.db().pool, claims.sub, claims.email.as_deref()).await?;

        Ok(AuthUser(Actor::from(&profile)))
    }
}
