use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::scope::ScopeError;
use services::services::{
    access::AccessError, announcements::AnnouncementError, campaigns::CampaignError,
    conversations::ConversationError, dashboard::DashboardError, members::MemberError,
    onboarding::OnboardingError, organisations::OrganisationError,
    support_chat::SupportChatError,
};
use thiserror::Error;
use utils::{jwt::JwtError, response::ApiResponse};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Member(#[from] MemberError),
    #[error(transparent)]
    Organisation(#[from] OrganisationError),
    #[error(transparent)]
    Announcement(#[from] AnnouncementError),
    #[error(transparent)]
    Campaign(#[from] CampaignError),
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Onboarding(#[from] OnboardingError),
    #[error(transparent)]
    Dashboard(#[from] DashboardError),
    #[error(transparent)]
    SupportChat(#[from] SupportChatError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

fn access_status(err: &AccessError) -> StatusCode {
    match err {
        AccessError::Forbidden(_) => StatusCode::FORBIDDEN,
        AccessError::ProfileNotFound => StatusCode::NOT_FOUND,
        AccessError::MissingArea(_) => StatusCode::BAD_REQUEST,
        AccessError::Scope(ScopeError::MissingIdentifier(_)) => StatusCode::BAD_REQUEST,
        AccessError::Scope(ScopeError::UnknownArea(..)) => StatusCode::NOT_FOUND,
        AccessError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::Jwt(_) => StatusCode::UNAUTHORIZED,
            ApiError::Access(e) => access_status(e),
            ApiError::Member(e) => match e {
                MemberError::NotFound => StatusCode::NOT_FOUND,
                MemberError::InvalidTransition { .. } | MemberError::DuplicateEmail => {
                    StatusCode::CONFLICT
                }
                MemberError::Validation(_) => StatusCode::BAD_REQUEST,
                MemberError::Access(e) => access_status(e),
                MemberError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Organisation(e) => match e {
                OrganisationError::NotFound => StatusCode::NOT_FOUND,
                OrganisationError::HasMembers(_) => StatusCode::CONFLICT,
                OrganisationError::Validation(_) => StatusCode::BAD_REQUEST,
                OrganisationError::Access(e) => access_status(e),
                OrganisationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Announcement(e) => match e {
                AnnouncementError::NotFound => StatusCode::NOT_FOUND,
                AnnouncementError::InvalidTransition { .. } | AnnouncementError::Archived => {
                    StatusCode::CONFLICT
                }
                AnnouncementError::Validation(_) => StatusCode::BAD_REQUEST,
                AnnouncementError::Access(e) => access_status(e),
                AnnouncementError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Campaign(e) => match e {
                CampaignError::NotFound => StatusCode::NOT_FOUND,
                CampaignError::InvalidState { .. } | CampaignError::NoRecipients => {
                    StatusCode::CONFLICT
                }
                CampaignError::Validation(_) => StatusCode::BAD_REQUEST,
                CampaignError::Access(e) => access_status(e),
                CampaignError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Conversation(e) => match e {
                ConversationError::NotFound => StatusCode::NOT_FOUND,
                ConversationError::Validation(_) => StatusCode::BAD_REQUEST,
                ConversationError::Access(e) => access_status(e),
                ConversationError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Onboarding(e) => match e {
                OnboardingError::NotFound => StatusCode::NOT_FOUND,
                OnboardingError::AlreadyPending
                | OnboardingError::AlreadyMember
                | OnboardingError::AlreadyReviewed
                | OnboardingError::MemberNotPending => StatusCode::CONFLICT,
                OnboardingError::Validation(_) => StatusCode::BAD_REQUEST,
                OnboardingError::Access(e) => access_status(e),
                OnboardingError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Dashboard(e) => match e {
                DashboardError::Access(e) => access_status(e),
                DashboardError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::SupportChat(e) => match e {
                SupportChatError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                SupportChatError::Validation(_) => StatusCode::BAD_REQUEST,
                SupportChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
                SupportChatError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
            match status {
                StatusCode::INTERNAL_SERVER_ERROR => "internal server error".to_string(),
                _ => self.to_string(),
            }
        } else {
            self.to_string()
        };
        let response = ApiResponse::<()>::error(&message);
        (status, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use db::{models::member::MemberStatus, scope::ScopeType};

    use super::*;

    #[test]
    fn maps_service_errors_to_statuses() {
        let cases = [
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::Jwt(JwtError::Expired), StatusCode::UNAUTHORIZED),
            (
                ApiError::Member(MemberError::InvalidTransition {
                    from: MemberStatus::Rejected,
                    to: MemberStatus::Validated,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Campaign(CampaignError::Access(AccessError::Forbidden("nope"))),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Access(AccessError::Scope(ScopeError::MissingIdentifier(
                    ScopeType::Region,
                ))),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Organisation(OrganisationError::HasMembers(3)),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::SupportChat(SupportChatError::Disabled),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::Database(sqlx::Error::RowNotFound),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let response = ApiError::Database(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
