use std::sync::Arc;

use axum::{Router, http::HeaderValue};
use db::DBService;
use services::services::{
    announcements::AnnouncementService,
    campaigns::CampaignService,
    claude_api::ClaudeApiClient,
    conversations::ConversationService,
    dashboard::DashboardService,
    email::{EmailProvider, build_provider},
    members::MemberService,
    onboarding::OnboardingService,
    organisations::OrganisationService,
    support_chat::SupportChatService,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utils::jwt::{JwtVerifier, SUPABASE_AUDIENCE};

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use config::Config;

/// Shared handles every handler receives through `State`.
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    jwt: Arc<JwtVerifier>,
    members: MemberService,
    organisations: OrganisationService,
    announcements: AnnouncementService,
    campaigns: CampaignService,
    conversations: ConversationService,
    onboarding: OnboardingService,
    dashboard: DashboardService,
    support: SupportChatService,
}

impl AppState {
    pub fn new(db: DBService, config: &Config) -> anyhow::Result<Self> {
        let provider = build_provider(
            config.email_provider,
            config.email_api_key.clone(),
            config.email_sender(),
        )?;
        let claude = config
            .anthropic_api_key
            .clone()
            .map(|key| ClaudeApiClient::new(key, config.support_ai_model.clone()))
            .transpose()?;
        Ok(Self::with_parts(
            db,
            JwtVerifier::new(config.jwt_secret.clone(), Some(SUPABASE_AUDIENCE)),
            provider,
            config.campaign_batch_size,
            claude,
        ))
    }

    pub fn with_parts(
        db: DBService,
        jwt: JwtVerifier,
        provider: Arc<dyn EmailProvider>,
        campaign_batch_size: i64,
        claude: Option<ClaudeApiClient>,
    ) -> Self {
        Self {
            jwt: Arc::new(jwt),
            members: MemberService::new(db.clone()),
            organisations: OrganisationService::new(db.clone()),
            announcements: AnnouncementService::new(db.clone()),
            campaigns: CampaignService::new(db.clone(), provider, campaign_batch_size),
            conversations: ConversationService::new(db.clone()),
            onboarding: OnboardingService::new(db.clone()),
            dashboard: DashboardService::new(db.clone()),
            support: SupportChatService::new(db.clone(), claude),
            db,
        }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn jwt(&self) -> &JwtVerifier {
        &self.jwt
    }

    pub fn members(&self) -> &MemberService {
        &self.members
    }

    pub fn organisations(&self) -> &OrganisationService {
        &self.organisations
    }

    pub fn announcements(&self) -> &AnnouncementService {
        &self.announcements
    }

    pub fn campaigns(&self) -> &CampaignService {
        &self.campaigns
    }

    pub fn conversations(&self) -> &ConversationService {
        &self.conversations
    }

    pub fn onboarding(&self) -> &OnboardingService {
        &self.onboarding
    }

    pub fn dashboard(&self) -> &DashboardService {
        &self.dashboard
    }

    pub fn support(&self) -> &SupportChatService {
        &self.support
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}

/// The full HTTP application.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .nest("/api", routes::router(&state))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
