use std::{fs, path::PathBuf};

use ts_rs::TS;

fn generate_types_content() -> String {
    let header = "// This file was generated by `generate-types`. Do not edit it by hand.\n\n";
    let decls = [
        db::scope::ScopeType::decl(),
        db::scope::Location::decl(),
        db::scope::ScopeTarget::decl(),
        db::models::geography::Region::decl(),
        db::models::geography::Prefecture::decl(),
        db::models::geography::Commune::decl(),
        db::models::profile::UserRole::decl(),
        db::models::profile::Profile::decl(),
        db::models::profile::UpdateProfileRole::decl(),
        db::models::member::MemberStatus::decl(),
        db::models::member::Cellule::decl(),
        db::models::member::Member::decl(),
        db::models::member::CreateMember::decl(),
        db::models::member::UpdateMember::decl(),
        db::models::organisation::Organisation::decl(),
        db::models::organisation::OrganisationWithCount::decl(),
        db::models::organisation::CreateOrganisation::decl(),
        db::models::organisation::UpdateOrganisation::decl(),
        db::models::announcement::AnnouncementStatus::decl(),
        db::models::announcement::Announcement::decl(),
        db::models::announcement::AnnouncementWithScopes::decl(),
        db::models::announcement::CreateAnnouncement::decl(),
        db::models::announcement::UpdateAnnouncement::decl(),
        db::models::email_campaign::CampaignStatus::decl(),
        db::models::email_campaign::RecipientStatus::decl(),
        db::models::email_campaign::EmailCampaign::decl(),
        db::models::email_campaign::CreateEmailCampaign::decl(),
        db::models::email_campaign::UpdateEmailCampaign::decl(),
        db::models::email_campaign::CampaignRecipient::decl(),
        db::models::email_campaign::RecipientCounts::decl(),
        db::models::conversation::ConversationKind::decl(),
        db::models::conversation::Conversation::decl(),
        db::models::conversation::ConversationSummary::decl(),
        db::models::conversation::Message::decl(),
        db::models::conversation::CreateConversation::decl(),
        db::models::conversation::CreateMessage::decl(),
        db::models::onboarding::SubmissionStatus::decl(),
        db::models::onboarding::OnboardingSubmission::decl(),
        db::models::onboarding::OnboardingSubmissionWithMember::decl(),
        db::models::onboarding::SubmitOnboarding::decl(),
        db::models::onboarding::ReviewOnboarding::decl(),
        db::models::dashboard::CountBucket::decl(),
        db::models::dashboard::RegionCount::decl(),
        db::models::dashboard::DashboardSummary::decl(),
        db::models::support_chat::ChatRole::decl(),
        db::models::support_chat::SupportChatMessage::decl(),
        services::services::access::Actor::decl(),
        services::services::members::MemberQuery::decl(),
        services::services::members::StatusChange::decl(),
        services::services::organisations::OrganisationQuery::decl(),
        services::services::announcements::AnnouncementQuery::decl(),
        services::services::campaigns::ScheduleCampaign::decl(),
        services::services::campaigns::CampaignQuery::decl(),
        services::services::campaigns::RecipientQuery::decl(),
        services::services::conversations::MessageQuery::decl(),
        services::services::onboarding::SubmissionQuery::decl(),
        services::services::support_chat::AskSupport::decl(),
        services::services::support_chat::SupportReply::decl(),
        server::routes::health::HealthStatus::decl(),
        server::routes::health::DatabaseHealth::decl(),
        utils::pagination::Pagination::decl(),
        utils::pagination::Page::<()>::decl(),
        utils::response::ApiResponse::<()>::decl(),
    ];

    let body = decls
        .into_iter()
        .map(|d| {
            let trimmed = d.trim_start();
            if trimmed.starts_with("export") {
                d
            } else {
                format!("export {trimmed}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{header}{body}\n")
}

fn main() {
    let check_mode = std::env::args().any(|arg| arg == "--check");
    let shared_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../shared");
    let types_path = shared_path.join("types.ts");
    let generated = generate_types_content();

    if check_mode {
        let current = fs::read_to_string(&types_path).unwrap_or_default();
        if current == generated {
            println!("shared/types.ts is up to date.");
            std::process::exit(0);
        }
        eprintln!("shared/types.ts is out of date. Run `cargo run --bin generate-types`.");
        std::process::exit(1);
    }

    if let Err(e) = fs::create_dir_all(&shared_path).and_then(|_| fs::write(&types_path, generated)) {
        eprintln!("Failed to write {}: {}", types_path.display(), e);
        std::process::exit(1);
    }
    println!("Wrote {}", types_path.display());
}
