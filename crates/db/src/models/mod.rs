pub mod announcement;
pub mod conversation;
pub mod dashboard;
pub mod email_campaign;
pub mod geography;
pub mod member;
pub mod onboarding;
pub mod organisation;
pub mod profile;
pub mod support_chat;
