use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        conversation::{
            Conversation, ConversationKind, ConversationSummary, CreateConversation, Message,
        },
        profile::Profile,
    },
    scope::{AudienceScope, ScopeTarget},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::{MAX_PER_PAGE, Pagination};
use uuid::Uuid;

use super::access::{AccessError, Actor};

const MAX_MESSAGE_LEN: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found")]
    NotFound,
    #[error("invalid conversation: {0}")]
    Validation(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct MessageQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl MessageQuery {
    fn limit(&self) -> i64 {
        i64::from(self.limit.unwrap_or(50).clamp(1, MAX_PER_PAGE))
    }
}

fn validate_body(body: &str) -> Result<&str, ConversationError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ConversationError::Validation("message is empty".to_string()));
    }
    if body.chars().count() > MAX_MESSAGE_LEN {
        return Err(ConversationError::Validation(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(body)
}

/// Resolved audience of a broadcast, if the stored scope is well formed.
fn broadcast_scope(conversation: &Conversation) -> Option<(AudienceScope, ScopeTarget)> {
    let target = conversation.scope_target()?;
    target.resolve().ok().map(|scope| (scope, target))
}

#[derive(Clone)]
pub struct ConversationService {
    db: DBService,
}

impl ConversationService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        actor: &Actor,
        data: CreateConversation,
    ) -> Result<Conversation, ConversationError> {
        let title = data
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let conversation = match data.kind {
            ConversationKind::Direct => {
                if actor.member_id.is_none() && !actor.is_staff() {
                    return Err(AccessError::Forbidden(
                        "complete your membership before messaging",
                    )
                    .into());
                }
                let others: Vec<Uuid> = data
                    .participant_ids
                    .iter()
                    .copied()
                    .filter(|id| *id != actor.profile_id)
                    .collect();
                if others.is_empty() {
                    return Err(ConversationError::Validation(
                        "a direct conversation needs at least one other participant".to_string(),
                    ));
                }
                for id in &others {
                    if Profile::find_by_id(&self.db.pool, *id).await?.is_none() {
                        return Err(ConversationError::Validation(format!(
                            "unknown participant {id}"
                        )));
                    }
                }
                Conversation::create(
                    &self.db.pool,
                    actor.profile_id,
                    ConversationKind::Direct,
                    title,
                    None,
                    &others,
                )
                .await?
            }
            ConversationKind::Broadcast => {
                let Some(title) = title else {
                    return Err(ConversationError::Validation(
                        "a broadcast needs a title".to_string(),
                    ));
                };
                let scope = match data.scope.as_ref() {
                    Some(target) => target.resolve().map_err(AccessError::from)?,
                    None => AudienceScope::All,
                };
                let location = actor.ensure_covers(&self.db.pool, &scope).await?;
                let stored = ScopeTarget::stored(scope, &location);
                Conversation::create(
                    &self.db.pool,
                    actor.profile_id,
                    ConversationKind::Broadcast,
                    Some(title),
                    Some(&stored),
                    &[],
                )
                .await?
            }
        };

        info!(
            conversation_id = %conversation.id,
            kind = %conversation.kind,
            actor_id = %actor.profile_id,
            "Conversation created"
        );
        Ok(conversation)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        pagination: &Pagination,
    ) -> Result<Vec<ConversationSummary>, ConversationError> {
        Ok(Conversation::list_visible(
            &self.db.pool,
            actor.profile_id,
            &actor.location,
            pagination.limit(),
            pagination.offset(),
        )
        .await?)
    }

    /// Staff managing a broadcast's audience.
    fn manages_broadcast(actor: &Actor, conversation: &Conversation) -> bool {
        let Some((scope, target)) = broadcast_scope(conversation) else {
            return false;
        };
        actor.is_staff()
            && actor
                .authority()
                .is_some_and(|authority| authority.covers(&scope, &target.location()))
    }

    async fn find_readable(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Conversation, ConversationError> {
        let conversation = Conversation::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(ConversationError::NotFound)?;
        if Conversation::is_participant(&self.db.pool, id, actor.profile_id).await? {
            return Ok(conversation);
        }
        if conversation.kind == ConversationKind::Broadcast {
            let reaches = broadcast_scope(&conversation)
                .is_some_and(|(scope, _)| scope.contains(&actor.location));
            if reaches || Self::manages_broadcast(actor, &conversation) {
                return Ok(conversation);
            }
        }
        Err(ConversationError::NotFound)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Conversation, ConversationError> {
        self.find_readable(actor, id).await
    }

    pub async fn messages(
        &self,
        actor: &Actor,
        id: Uuid,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, ConversationError> {
        self.find_readable(actor, id).await?;
        Ok(Message::list(&self.db.pool, id, query.before, query.limit()).await?)
    }

    /// Direct: any participant. Broadcast: its author or staff managing
    /// its audience.
    pub async fn post(
        &self,
        actor: &Actor,
        id: Uuid,
        body: &str,
    ) -> Result<Message, ConversationError> {
        let body = validate_body(body)?;
        let conversation = self.find_readable(actor, id).await?;
        let allowed = match conversation.kind {
            ConversationKind::Direct => {
                Conversation::is_participant(&self.db.pool, id, actor.profile_id).await?
            }
            ConversationKind::Broadcast => {
                conversation.created_by == actor.profile_id
                    || Self::manages_broadcast(actor, &conversation)
            }
        };
        if !allowed {
            return Err(AccessError::Forbidden("you cannot post in this conversation").into());
        }
        let message = Message::create(&self.db.pool, id, actor.profile_id, body).await?;
        info!(conversation_id = %id, message_id = %message.id, "Message posted");
        Ok(message)
    }

    pub async fn mark_read(&self, actor: &Actor, id: Uuid) -> Result<(), ConversationError> {
        self.find_readable(actor, id).await?;
        Conversation::mark_read(&self.db.pool, id, actor.profile_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use db::{
        models::profile::UserRole,
        scope::{Location, ScopeType},
    };

    use super::*;

    fn broadcast(target: Option<ScopeTarget>) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Broadcast,
            title: Some("Info".to_string()),
            created_by: Uuid::new_v4(),
            scope_type: target.and_then(|t| t.scope_type),
            region_id: target.and_then(|t| t.region_id),
            prefecture_id: target.and_then(|t| t.prefecture_id),
            commune_id: target.and_then(|t| t.commune_id),
            last_message_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn actor(role: UserRole, location: Location) -> Actor {
        Actor {
            profile_id: Uuid::new_v4(),
            email: None,
            role,
            member_id: None,
            location,
        }
    }

    #[test]
    fn message_body_is_trimmed_and_bounded() {
        assert_eq!(validate_body("  salut  ").unwrap(), "salut");
        assert!(validate_body("   ").is_err());
        assert!(validate_body(&"a".repeat(MAX_MESSAGE_LEN + 1)).is_err());
    }

    #[test]
    fn message_limit_is_clamped() {
        let query = MessageQuery {
            before: None,
            limit: Some(1000),
        };
        assert_eq!(query.limit(), 100);
        assert_eq!(MessageQuery::default().limit(), 50);
    }

    #[test]
    fn regional_manager_manages_broadcasts_in_region() {
        let region = Uuid::new_v4();
        let location = Location {
            region_id: Some(region),
            ..Default::default()
        };
        let target = ScopeTarget::stored(AudienceScope::Region(region), &location);
        let conversation = broadcast(Some(target));

        let manager = actor(UserRole::RegionalManager, location);
        assert!(ConversationService::manages_broadcast(&manager, &conversation));

        let other = actor(
            UserRole::RegionalManager,
            Location {
                region_id: Some(Uuid::new_v4()),
                ..Default::default()
            },
        );
        assert!(!ConversationService::manages_broadcast(&other, &conversation));

        let member = actor(UserRole::Member, location);
        assert!(!ConversationService::manages_broadcast(&member, &conversation));
    }

    #[test]
    fn malformed_broadcast_has_no_audience() {
        let conversation = broadcast(Some(ScopeTarget {
            scope_type: Some(ScopeType::Prefecture),
            ..Default::default()
        }));
        assert!(broadcast_scope(&conversation).is_none());
        assert!(broadcast_scope(&broadcast(None)).is_none());
    }
}
