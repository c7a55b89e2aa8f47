pub mod access;
pub mod announcements;
pub mod campaign_dispatcher;
pub mod campaigns;
pub mod claude_api;
pub mod conversations;
pub mod dashboard;
pub mod email;
pub mod members;
pub mod onboarding;
pub mod organisations;
pub mod support_chat;
