use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::Location;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    Admin,
    RegionalManager,
    PrefectureManager,
    CommuneManager,
    #[default]
    Member,
}

/// One row per authenticated user; `id` is the auth provider's subject.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub member_id: Option<Uuid>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateProfileRole {
    pub role: UserRole,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
}

const PROFILE_COLUMNS: &str = "id, email, full_name, role, member_id, region_id, prefecture_id, \
                               commune_id, created_at, updated_at";

impl Profile {
    pub fn location(&self) -> Location {
        Location {
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Returns the profile, creating a plain member profile on first sign-in.
    pub async fn find_or_create(
        pool: &PgPool,
        id: Uuid,
        email: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO profiles (id, email)
               VALUES ($1, $2)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(id)
        .bind(email)
        .execute(pool)
        .await?;

        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(pool)
        .await
    }

    pub async fn update_role(
        pool: &PgPool,
        id: Uuid,
        data: &UpdateProfileRole,
        location: &Location,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"UPDATE profiles
               SET role = $2, region_id = $3, prefecture_id = $4, commune_id = $5,
                   updated_at = NOW()
               WHERE id = $1
               RETURNING {PROFILE_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.role)
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .fetch_optional(pool)
        .await
    }

    /// Links a member record and copies its location onto the profile.
    pub async fn link_member<'e, E>(
        executor: E,
        id: Uuid,
        member_id: Uuid,
        location: &Location,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"UPDATE profiles
               SET member_id = $2, region_id = $3, prefecture_id = $4, commune_id = $5,
                   updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(member_id)
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Copies a relocated member's geography onto the plain member profile
    /// linked to it. Staff profiles keep their area.
    pub async fn sync_member_location<'e, E>(
        executor: E,
        member_id: Uuid,
        location: &Location,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"UPDATE profiles
               SET region_id = $2, prefecture_id = $3, commune_id = $4, updated_at = NOW()
               WHERE member_id = $1 AND role = 'member'"#,
        )
        .bind(member_id)
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Detaches `member_id` from the profile if it is still linked.
    pub async fn unlink_member<'e, E>(executor: E, id: Uuid, member_id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"UPDATE profiles SET member_id = NULL, updated_at = NOW()
               WHERE id = $1 AND member_id = $2"#,
        )
        .bind(id)
        .bind(member_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
