use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::{self, Location, ScopeTarget, ScopeType};

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "conversation_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationKind {
    /// Explicit participant list.
    Direct,
    /// Staff announcement thread readable by everyone in its scope.
    Broadcast,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_by: Uuid,
    pub scope_type: Option<ScopeType>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ConversationSummary {
    #[serde(flatten)]
    #[ts(flatten)]
    #[sqlx(flatten)]
    pub conversation: Conversation,
    pub last_message_body: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateConversation {
    pub kind: ConversationKind,
    pub title: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<Uuid>,
    pub scope: Option<ScopeTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateMessage {
    pub body: String,
}

const CONVERSATION_COLUMNS: &str = "c.id, c.kind, c.title, c.created_by, c.scope_type, \
     c.region_id, c.prefecture_id, c.commune_id, c.last_message_at, c.created_at, c.updated_at";

impl Conversation {
    pub fn scope_target(&self) -> Option<ScopeTarget> {
        self.scope_type.map(|scope_type| ScopeTarget {
            scope_type: Some(scope_type),
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        })
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Creates the conversation and its participant rows. The creator is
    /// always a participant.
    pub async fn create(
        pool: &PgPool,
        created_by: Uuid,
        kind: ConversationKind,
        title: Option<&str>,
        scope: Option<&ScopeTarget>,
        participant_ids: &[Uuid],
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            r#"INSERT INTO conversations AS c
                   (kind, title, created_by, scope_type, region_id, prefecture_id, commune_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING {CONVERSATION_COLUMNS}"#
        ))
        .bind(kind)
        .bind(title)
        .bind(created_by)
        .bind(scope.and_then(|s| s.scope_type))
        .bind(scope.and_then(|s| s.region_id))
        .bind(scope.and_then(|s| s.prefecture_id))
        .bind(scope.and_then(|s| s.commune_id))
        .fetch_one(&mut *tx)
        .await?;

        let mut members: Vec<Uuid> = Vec::with_capacity(participant_ids.len() + 1);
        members.push(created_by);
        for id in participant_ids {
            if !members.contains(id) {
                members.push(*id);
            }
        }
        sqlx::query(
            r#"INSERT INTO conversation_participants (conversation_id, profile_id)
               SELECT $1, UNNEST($2::uuid[])
               ON CONFLICT DO NOTHING"#,
        )
        .bind(conversation.id)
        .bind(&members)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    pub async fn is_participant(
        pool: &PgPool,
        conversation_id: Uuid,
        profile_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                   SELECT 1 FROM conversation_participants
                   WHERE conversation_id = $1 AND profile_id = $2
               )"#,
        )
        .bind(conversation_id)
        .bind(profile_id)
        .fetch_one(pool)
        .await
    }

    /// Conversations `profile_id` takes part in, plus broadcasts reaching
    /// `location`, most recently active first.
    pub async fn list_visible(
        pool: &PgPool,
        profile_id: Uuid,
        location: &Location,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ConversationSummary>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {CONVERSATION_COLUMNS},"));
        qb.push(
            r#"
                lm.body AS last_message_body,
                lm.sender_id AS last_message_sender_id,
                (SELECT COUNT(*) FROM messages m
                 WHERE m.conversation_id = c.id
                   AND m.sender_id <> "#,
        )
        .push_bind(profile_id)
        .push(
            r#"
                   AND m.created_at > COALESCE(p.last_read_at, '-infinity'::timestamptz)
                ) AS unread_count
               FROM conversations c
               LEFT JOIN conversation_participants p
                 ON p.conversation_id = c.id AND p.profile_id = "#,
        )
        .push_bind(profile_id)
        .push(
            r#"
               LEFT JOIN LATERAL (
                   SELECT body, sender_id FROM messages
                   WHERE conversation_id = c.id
                   ORDER BY created_at DESC
                   LIMIT 1
               ) lm ON TRUE
               WHERE p.profile_id IS NOT NULL
                  OR (c.kind = 'broadcast' AND "#,
        );
        scope::push_reaches_location(&mut qb, "c", location);
        qb.push(
            r#")
               ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.id
               LIMIT "#,
        )
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

        qb.build_query_as::<ConversationSummary>().fetch_all(pool).await
    }

    /// Records that `profile_id` has read everything up to now. Broadcast
    /// readers get a participant row on first read.
    pub async fn mark_read(
        pool: &PgPool,
        conversation_id: Uuid,
        profile_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO conversation_participants (conversation_id, profile_id, last_read_at)
               VALUES ($1, $2, NOW())
               ON CONFLICT (conversation_id, profile_id)
               DO UPDATE SET last_read_at = NOW()"#,
        )
        .bind(conversation_id)
        .bind(profile_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

impl Message {
    pub async fn create(
        pool: &PgPool,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let message = sqlx::query_as::<_, Message>(
            r#"INSERT INTO messages (conversation_id, sender_id, body)
               VALUES ($1, $2, $3)
               RETURNING id, conversation_id, sender_id, body, created_at"#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE conversations
               SET last_message_at = $2, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        // The sender has read their own message.
        sqlx::query(
            r#"UPDATE conversation_participants SET last_read_at = $3
               WHERE conversation_id = $1 AND profile_id = $2"#,
        )
        .bind(conversation_id)
        .bind(sender_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Messages older than `before` (or the latest ones), newest first.
    pub async fn list(
        pool: &PgPool,
        conversation_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Message>(
            r#"SELECT id, conversation_id, sender_id, body, created_at
               FROM messages
               WHERE conversation_id = $1
                 AND ($2::timestamptz IS NULL OR created_at < $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3"#,
        )
        .bind(conversation_id)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
