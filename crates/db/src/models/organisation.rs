use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use ts_rs::TS;
use uuid::Uuid;

use super::member::like_pattern;
use crate::scope::Location;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Organisation {
    pub id: Uuid,
    pub name: String,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateOrganisation {
    pub name: String,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateOrganisation {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct OrganisationWithCount {
    #[serde(flatten)]
    #[ts(flatten)]
    #[sqlx(flatten)]
    pub organisation: Organisation,
    pub member_count: i64,
}

const ORGANISATION_COLUMNS: &str = "o.id, o.name, o.kind, o.description, o.contact_email, \
     o.contact_phone, o.region_id, o.prefecture_id, o.commune_id, o.is_active, o.created_at, \
     o.updated_at";

impl Organisation {
    pub fn location(&self) -> Location {
        Location {
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organisation>(&format!(
            "SELECT {ORGANISATION_COLUMNS} FROM organisations o WHERE o.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        search: Option<&str>,
        include_inactive: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<OrganisationWithCount>, i64), sqlx::Error> {
        fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, search: Option<&str>, include_inactive: bool) {
            qb.push(" WHERE TRUE");
            if !include_inactive {
                qb.push(" AND o.is_active");
            }
            if let Some(term) = search.filter(|s| !s.trim().is_empty()) {
                qb.push(" AND o.name ILIKE ").push_bind(like_pattern(term));
            }
        }

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM organisations o");
        push_filters(&mut count_qb, search, include_inactive);
        let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"SELECT {ORGANISATION_COLUMNS},
                   (SELECT COUNT(*) FROM members m WHERE m.organisation_id = o.id) AS member_count
               FROM organisations o"#
        ));
        push_filters(&mut qb, search, include_inactive);
        qb.push(" ORDER BY o.name LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build_query_as::<OrganisationWithCount>().fetch_all(pool).await?;

        Ok((rows, total))
    }

    pub async fn create(
        pool: &PgPool,
        data: &CreateOrganisation,
        location: &Location,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Organisation>(&format!(
            r#"INSERT INTO organisations AS o (
                   name, kind, description, contact_email, contact_phone,
                   region_id, prefecture_id, commune_id
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING {ORGANISATION_COLUMNS}"#
        ))
        .bind(data.name.trim())
        .bind(data.kind.as_deref())
        .bind(data.description.as_deref())
        .bind(data.contact_email.as_deref())
        .bind(data.contact_phone.as_deref())
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .fetch_one(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: &UpdateOrganisation,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organisation>(&format!(
            r#"UPDATE organisations AS o SET
                   name = COALESCE($2, o.name),
                   kind = COALESCE($3, o.kind),
                   description = COALESCE($4, o.description),
                   contact_email = COALESCE($5, o.contact_email),
                   contact_phone = COALESCE($6, o.contact_phone),
                   is_active = COALESCE($7, o.is_active),
                   updated_at = NOW()
               WHERE o.id = $1
               RETURNING {ORGANISATION_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.kind.as_deref())
        .bind(data.description.as_deref())
        .bind(data.contact_email.as_deref())
        .bind(data.contact_phone.as_deref())
        .bind(data.is_active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM organisations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
