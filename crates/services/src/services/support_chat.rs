use db::{
    DBService,
    models::support_chat::{ChatRole, SupportChatMessage},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use ts_rs::TS;

use super::{
    access::Actor,
    claude_api::{ClaudeApiClient, ClaudeApiError, Message},
};

/// Messages of history sent along with a new question.
const HISTORY_LIMIT: i64 = 20;
const MAX_QUESTION_LEN: usize = 4_000;
const MAX_REPLY_TOKENS: u32 = 1024;

const SYSTEM_PROMPT: &str = "You are the support assistant of the CZI membership portal. \
Help members and staff with their membership, onboarding, announcements, messaging and \
email campaigns. Answer in the language of the question, keep answers short and practical, \
and never invent membership numbers, statuses or personal data. When a request needs a \
human (payments, disputes, data corrections), tell the user to contact their commune or \
regional manager.";

#[derive(Debug, Error)]
pub enum SupportChatError {
    #[error("support assistant is not configured")]
    Disabled,
    #[error("invalid question: {0}")]
    Validation(String),
    #[error("assistant error: {0}")]
    Upstream(#[from] ClaudeApiError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct AskSupport {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct SupportReply {
    pub question: SupportChatMessage,
    pub answer: SupportChatMessage,
}

/// Prior turns plus the new question, starting with a user turn as the
/// Messages API requires.
fn conversation(history: &[SupportChatMessage], question: &str) -> Vec<Message> {
    let mut messages: Vec<Message> = history
        .iter()
        .skip_while(|m| m.role == ChatRole::Assistant)
        .map(Message::from)
        .collect();
    messages.push(Message::user(question));
    messages
}

#[derive(Clone)]
pub struct SupportChatService {
    db: DBService,
    client: Option<ClaudeApiClient>,
}

impl SupportChatService {
    pub fn new(db: DBService, client: Option<ClaudeApiClient>) -> Self {
        Self { db, client }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&ClaudeApiClient, SupportChatError> {
        self.client.as_ref().ok_or(SupportChatError::Disabled)
    }

    pub async fn ask(&self, actor: &Actor, question: &str) -> Result<SupportReply, SupportChatError> {
        let client = self.client()?;
        let question = question.trim();
        if question.is_empty() {
            return Err(SupportChatError::Validation("message is empty".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_LEN {
            return Err(SupportChatError::Validation(format!(
                "message exceeds {MAX_QUESTION_LEN} characters"
            )));
        }

        let history =
            SupportChatMessage::recent(&self.db.pool, actor.profile_id, HISTORY_LIMIT).await?;
        let messages = conversation(&history, question);
        let reply = client
            .reply(&messages, Some(SYSTEM_PROMPT), MAX_REPLY_TOKENS)
            .await?;

        let question =
            SupportChatMessage::create(&self.db.pool, actor.profile_id, ChatRole::User, question)
                .await?;
        let answer =
            SupportChatMessage::create(&self.db.pool, actor.profile_id, ChatRole::Assistant, &reply)
                .await?;
        info!(
            profile_id = %actor.profile_id,
            history = history.len(),
            model = client.model(),
            "Support question answered"
        );
        Ok(SupportReply { question, answer })
    }

    pub async fn history(&self, actor: &Actor) -> Result<Vec<SupportChatMessage>, SupportChatError> {
        self.client()?;
        Ok(SupportChatMessage::recent(&self.db.pool, actor.profile_id, HISTORY_LIMIT).await?)
    }

    pub async fn clear(&self, actor: &Actor) -> Result<u64, SupportChatError> {
        self.client()?;
        Ok(SupportChatMessage::delete_all(&self.db.pool, actor.profile_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn chat(role: ChatRole, content: &str) -> SupportChatMessage {
        SupportChatMessage {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conversation_ends_with_the_question() {
        let history = [
            chat(ChatRole::User, "Comment adhérer ?"),
            chat(ChatRole::Assistant, "Remplissez le formulaire."),
        ];
        let messages = conversation(&history, "Et ensuite ?");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], Message::assistant("Remplissez le formulaire."));
        assert_eq!(messages[2], Message::user("Et ensuite ?"));
    }

    #[test]
    fn truncated_history_starts_with_a_user_turn() {
        let history = [
            chat(ChatRole::Assistant, "...fin de réponse"),
            chat(ChatRole::User, "Merci"),
            chat(ChatRole::Assistant, "Avec plaisir"),
        ];
        let messages = conversation(&history, "Autre question");
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages.len(), 3);
    }
}
