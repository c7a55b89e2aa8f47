use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "chat_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct SupportChatMessage {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

const CHAT_COLUMNS: &str = "id, profile_id, role, content, created_at";

impl SupportChatMessage {
    pub async fn create(
        pool: &PgPool,
        profile_id: Uuid,
        role: ChatRole,
        content: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SupportChatMessage>(&format!(
            r#"INSERT INTO support_ai_chats (profile_id, role, content)
               VALUES ($1, $2, $3)
               RETURNING {CHAT_COLUMNS}"#
        ))
        .bind(profile_id)
        .bind(role)
        .bind(content)
        .fetch_one(pool)
        .await
    }

    /// The last `limit` messages in chronological order.
    pub async fn recent(
        pool: &PgPool,
        profile_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut rows = sqlx::query_as::<_, SupportChatMessage>(&format!(
            r#"SELECT {CHAT_COLUMNS} FROM support_ai_chats
               WHERE profile_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#
        ))
        .bind(profile_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn delete_all(pool: &PgPool, profile_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM support_ai_chats WHERE profile_id = $1")
            .bind(profile_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
