use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::{AudienceScope, Location, ScopeError, ScopeType};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Region {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Prefecture {
    pub id: Uuid,
    pub region_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Commune {
    pub id: Uuid,
    pub prefecture_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum GeographyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl Region {
    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Region>("SELECT id, name, code, created_at FROM regions ORDER BY name")
            .fetch_all(pool)
            .await
    }
}

impl Prefecture {
    pub async fn find_by_region(pool: &PgPool, region_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Prefecture>(
            r#"SELECT id, region_id, name, created_at
               FROM prefectures
               WHERE region_id = $1
               ORDER BY name"#,
        )
        .bind(region_id)
        .fetch_all(pool)
        .await
    }
}

impl Commune {
    pub async fn find_by_prefecture(
        pool: &PgPool,
        prefecture_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Commune>(
            r#"SELECT id, prefecture_id, name, created_at
               FROM communes
               WHERE prefecture_id = $1
               ORDER BY name"#,
        )
        .bind(prefecture_id)
        .fetch_all(pool)
        .await
    }
}

/// Lookups over the region → prefecture → commune tree.
pub struct Geography;

impl Geography {
    /// Ancestry of the area a scope targets. `All` has an empty location.
    pub async fn locate(pool: &PgPool, scope: &AudienceScope) -> Result<Location, GeographyError> {
        let location = match *scope {
            AudienceScope::All => Some(Location::default()),
            AudienceScope::Region(id) => {
                sqlx::query_scalar::<_, Uuid>("SELECT id FROM regions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?
                    .map(|region_id| Location {
                        region_id: Some(region_id),
                        ..Default::default()
                    })
            }
            AudienceScope::Prefecture(id) => {
                sqlx::query_as::<_, (Uuid, Uuid)>(
                    "SELECT id, region_id FROM prefectures WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(pool)
                .await?
                .map(|(prefecture_id, region_id)| Location {
                    region_id: Some(region_id),
                    prefecture_id: Some(prefecture_id),
                    commune_id: None,
                })
            }
            AudienceScope::Commune(id) => {
                sqlx::query_as::<_, (Uuid, Uuid, Uuid)>(
                    r#"SELECT c.id, p.id, p.region_id
                       FROM communes c
                       JOIN prefectures p ON p.id = c.prefecture_id
                       WHERE c.id = $1"#,
                )
                .bind(id)
                .fetch_optional(pool)
                .await?
                .map(|(commune_id, prefecture_id, region_id)| Location {
                    region_id: Some(region_id),
                    prefecture_id: Some(prefecture_id),
                    commune_id: Some(commune_id),
                })
            }
        };

        location.ok_or_else(|| {
            let kind: ScopeType = scope.scope_type();
            let id = scope.area_id().unwrap_or_default();
            GeographyError::Scope(ScopeError::UnknownArea(kind, id))
        })
    }

    /// Normalises a partially filled location: the most specific id present
    /// determines the others, so the stored ancestry is always consistent.
    pub async fn normalise(pool: &PgPool, location: &Location) -> Result<Location, GeographyError> {
        let scope = if let Some(id) = location.commune_id {
            AudienceScope::Commune(id)
        } else if let Some(id) = location.prefecture_id {
            AudienceScope::Prefecture(id)
        } else if let Some(id) = location.region_id {
            AudienceScope::Region(id)
        } else {
            return Ok(Location::default());
        };
        Self::locate(pool, &scope).await
    }
}
