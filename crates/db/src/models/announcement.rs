use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::{self, AudienceScope, Location, ScopeTarget, ScopeType};

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "announcement_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnnouncementStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub status: AnnouncementStatus,
    pub author_id: Uuid,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct AnnouncementScopeRow {
    announcement_id: Uuid,
    scope_type: ScopeType,
    region_id: Option<Uuid>,
    prefecture_id: Option<Uuid>,
    commune_id: Option<Uuid>,
}

impl From<AnnouncementScopeRow> for ScopeTarget {
    fn from(row: AnnouncementScopeRow) -> Self {
        ScopeTarget {
            scope_type: Some(row.scope_type),
            region_id: row.region_id,
            prefecture_id: row.prefecture_id,
            commune_id: row.commune_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AnnouncementWithScopes {
    #[serde(flatten)]
    #[ts(flatten)]
    pub announcement: Announcement,
    pub scopes: Vec<ScopeTarget>,
}

impl std::ops::Deref for AnnouncementWithScopes {
    type Target = Announcement;
    fn deref(&self) -> &Self::Target {
        &self.announcement
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateAnnouncement {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub scopes: Vec<ScopeTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateAnnouncement {
    pub title: Option<String>,
    pub body: Option<String>,
    pub scopes: Option<Vec<ScopeTarget>>,
}

/// A resolved scope with its stored ancestry.
pub type LocatedScope = (AudienceScope, Location);

const ANNOUNCEMENT_COLUMNS: &str =
    "a.id, a.title, a.body, a.status, a.author_id, a.published_at, a.created_at, a.updated_at";

impl Announcement {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Announcement>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements a WHERE a.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_with_scopes(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<AnnouncementWithScopes>, sqlx::Error> {
        let Some(announcement) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let mut attached = Self::attach_scopes(pool, vec![announcement]).await?;
        Ok(attached.pop())
    }

    pub async fn create(
        pool: &PgPool,
        author_id: Uuid,
        data: &CreateAnnouncement,
        scopes: &[LocatedScope],
    ) -> Result<AnnouncementWithScopes, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let announcement = sqlx::query_as::<_, Announcement>(&format!(
            r#"INSERT INTO announcements AS a (title, body, author_id)
               VALUES ($1, $2, $3)
               RETURNING {ANNOUNCEMENT_COLUMNS}"#
        ))
        .bind(data.title.trim())
        .bind(&data.body)
        .bind(author_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::insert_scopes(&mut tx, announcement.id, scopes).await?;
        tx.commit().await?;

        Ok(AnnouncementWithScopes {
            announcement,
            scopes: stored_targets(scopes),
        })
    }

    async fn insert_scopes(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        announcement_id: Uuid,
        scopes: &[LocatedScope],
    ) -> Result<(), sqlx::Error> {
        for target in stored_targets(scopes) {
            sqlx::query(
                r#"INSERT INTO announcement_scopes
                       (announcement_id, scope_type, region_id, prefecture_id, commune_id)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(announcement_id)
            .bind(target.scope_type.unwrap_or(ScopeType::All))
            .bind(target.region_id)
            .bind(target.prefecture_id)
            .bind(target.commune_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Updates content and, when given, replaces the scopes.
    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: &UpdateAnnouncement,
        scopes: Option<&[LocatedScope]>,
    ) -> Result<Option<AnnouncementWithScopes>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let updated = sqlx::query_as::<_, Announcement>(&format!(
            r#"UPDATE announcements AS a SET
                   title = COALESCE($2, a.title),
                   body = COALESCE($3, a.body),
                   updated_at = NOW()
               WHERE a.id = $1
               RETURNING {ANNOUNCEMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.title.as_deref().map(str::trim))
        .bind(data.body.as_deref())
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            return Ok(None);
        }

        if let Some(scopes) = scopes {
            sqlx::query("DELETE FROM announcement_scopes WHERE announcement_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            Self::insert_scopes(&mut tx, id, scopes).await?;
        }
        tx.commit().await?;

        Self::find_with_scopes(pool, id).await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: AnnouncementStatus,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Announcement>(&format!(
            r#"UPDATE announcements AS a SET
                   status = $2,
                   published_at = CASE
                       WHEN $2 = 'published'::announcement_status THEN COALESCE(a.published_at, NOW())
                       ELSE a.published_at
                   END,
                   updated_at = NOW()
               WHERE a.id = $1
               RETURNING {ANNOUNCEMENT_COLUMNS}"#
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM announcements WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Published announcements reaching a member at `location`, newest first.
    pub async fn feed(
        pool: &PgPool,
        location: &Location,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnnouncementWithScopes>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"SELECT {ANNOUNCEMENT_COLUMNS}
               FROM announcements a
               WHERE a.status = 'published'
                 AND EXISTS (SELECT 1 FROM announcement_scopes s
                             WHERE s.announcement_id = a.id AND "#
        ));
        scope::push_reaches_location(&mut qb, "s", location);
        qb.push(") ORDER BY a.published_at DESC NULLS LAST, a.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build_query_as::<Announcement>().fetch_all(pool).await?;
        Self::attach_scopes(pool, rows).await
    }

    /// Announcements whose every scope lies inside `authority`, any status.
    pub async fn list_managed(
        pool: &PgPool,
        authority: &AudienceScope,
        status: Option<AnnouncementStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnnouncementWithScopes>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"SELECT {ANNOUNCEMENT_COLUMNS}
               FROM announcements a
               WHERE EXISTS (SELECT 1 FROM announcement_scopes s
                             WHERE s.announcement_id = a.id AND "#
        ));
        authority.push_location_filter(&mut qb, "s");
        qb.push(
            r#") AND NOT EXISTS (SELECT 1 FROM announcement_scopes o
                                WHERE o.announcement_id = a.id AND NOT COALESCE("#,
        );
        authority.push_location_filter(&mut qb, "o");
        qb.push(", FALSE))");
        if let Some(status) = status {
            qb.push(" AND a.status = ").push_bind(status);
        }
        qb.push(" ORDER BY a.created_at DESC, a.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build_query_as::<Announcement>().fetch_all(pool).await?;
        Self::attach_scopes(pool, rows).await
    }

    async fn attach_scopes(
        pool: &PgPool,
        announcements: Vec<Announcement>,
    ) -> Result<Vec<AnnouncementWithScopes>, sqlx::Error> {
        if announcements.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = announcements.iter().map(|a| a.id).collect();
        let rows = sqlx::query_as::<_, AnnouncementScopeRow>(
            r#"SELECT announcement_id, scope_type, region_id, prefecture_id, commune_id
               FROM announcement_scopes
               WHERE announcement_id = ANY($1)"#,
        )
        .bind(&ids)
        .fetch_all(pool)
        .await?;

        let mut by_announcement: HashMap<Uuid, Vec<ScopeTarget>> = HashMap::new();
        for row in rows {
            by_announcement
                .entry(row.announcement_id)
                .or_default()
                .push(row.into());
        }

        Ok(announcements
            .into_iter()
            .map(|announcement| AnnouncementWithScopes {
                scopes: by_announcement.remove(&announcement.id).unwrap_or_default(),
                announcement,
            })
            .collect())
    }
}

fn stored_targets(scopes: &[LocatedScope]) -> Vec<ScopeTarget> {
    scopes
        .iter()
        .map(|(scope, location)| ScopeTarget::stored(*scope, location))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn region(pool: &PgPool, name: &str) -> (AudienceScope, Location) {
        let id = sqlx::query_scalar::<_, Uuid>("INSERT INTO regions (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap();
        (
            AudienceScope::Region(id),
            Location {
                region_id: Some(id),
                ..Default::default()
            },
        )
    }

    async fn announce(pool: &PgPool, title: &str, scopes: &[LocatedScope]) -> Uuid {
        let author = Uuid::new_v4();
        sqlx::query("INSERT INTO profiles (id, role) VALUES ($1, 'admin')")
            .bind(author)
            .execute(pool)
            .await
            .unwrap();
        let data = CreateAnnouncement {
            title: title.to_string(),
            body: "Réunion samedi".to_string(),
            scopes: Vec::new(),
        };
        Announcement::create(pool, author, &data, scopes)
            .await
            .unwrap()
            .announcement
            .id
    }

    #[sqlx::test]
    async fn managed_listing_needs_every_scope_covered(pool: PgPool) {
        let conakry = region(&pool, "Conakry").await;
        let kindia = region(&pool, "Kindia").await;
        let local = announce(&pool, "Conakry only", &[conakry]).await;
        let shared = announce(&pool, "Conakry and Kindia", &[conakry, kindia]).await;
        let national = announce(&pool, "Everyone", &[(AudienceScope::All, Location::default())]).await;

        let listed = Announcement::list_managed(&pool, &conakry.0, None, 50, 0)
            .await
            .unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![local]);

        let all = Announcement::list_managed(&pool, &AudienceScope::All, None, 50, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|a| a.id == shared));
        assert!(all.iter().any(|a| a.id == national));
    }
}
