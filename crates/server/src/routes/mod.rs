use axum::Router;

use crate::AppState;

pub mod announcements;
pub mod auth;
pub mod conversations;
pub mod dashboard;
pub mod email_campaigns;
pub mod geography;
pub mod health;
pub mod members;
pub mod onboarding;
pub mod organisations;
pub mod support;

/// Every API route, mounted under `/api` by [`crate::app`].
pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router(state))
        .merge(auth::router(state))
        .merge(geography::router(state))
        .merge(members::router(state))
        .merge(organisations::router(state))
        .merge(announcements::router(state))
        .merge(email_campaigns::router(state))
        .merge(conversations::router(state))
        .merge(onboarding::router(state))
        .merge(dashboard::router(state))
        .merge(support::router(state))
}
