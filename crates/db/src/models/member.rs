use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::{AudienceScope, Location};

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "member_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Pending,
    Validated,
    Rejected,
    Suspended,
}

impl MemberStatus {
    /// pending → validated | rejected, validated → suspended,
    /// suspended → validated.
    pub fn can_transition_to(self, next: MemberStatus) -> bool {
        matches!(
            (self, next),
            (MemberStatus::Pending, MemberStatus::Validated)
                | (MemberStatus::Pending, MemberStatus::Rejected)
                | (MemberStatus::Validated, MemberStatus::Suspended)
                | (MemberStatus::Suspended, MemberStatus::Validated)
        )
    }
}

/// CZI membership sub-group.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "cellule", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Cellule {
    Engaged,
    Entrepreneur,
    OrgLeader,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Member {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub profession: Option<String>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub organisation_id: Option<Uuid>,
    pub cellule: Option<Cellule>,
    pub status: MemberStatus,
    pub membership_number: Option<String>,
    pub status_reason: Option<String>,
    pub validated_at: Option<DateTime<Utc>>,
    pub validated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateMember {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub profession: Option<String>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub organisation_id: Option<Uuid>,
    pub cellule: Option<Cellule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateMember {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub profession: Option<String>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub organisation_id: Option<Uuid>,
    pub cellule: Option<Cellule>,
}

impl UpdateMember {
    pub fn touches_location(&self) -> bool {
        self.region_id.is_some() || self.prefecture_id.is_some() || self.commune_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct MemberFilter {
    pub search: Option<String>,
    pub status: Option<MemberStatus>,
    pub cellule: Option<Cellule>,
    pub organisation_id: Option<Uuid>,
    pub scope: AudienceScope,
}

/// A member that can receive campaign email.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ReachableMember {
    pub member_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub membership_number: Option<String>,
}

const MEMBER_COLUMNS: &str = "m.id, m.first_name, m.last_name, m.email, m.phone, m.gender, \
     m.birth_date, m.profession, m.region_id, m.prefecture_id, m.commune_id, m.organisation_id, \
     m.cellule, m.status, m.membership_number, m.status_reason, m.validated_at, m.validated_by, \
     m.created_at, m.updated_at";

/// Escapes LIKE wildcards and wraps the term for a substring match.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_member_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &MemberFilter) {
    qb.push(" WHERE ");
    filter.scope.push_location_filter(qb, "m");
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = like_pattern(search);
        qb.push(" AND (m.first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.phone ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR m.membership_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(status) = filter.status {
        qb.push(" AND m.status = ").push_bind(status);
    }
    if let Some(cellule) = filter.cellule {
        qb.push(" AND m.cellule = ").push_bind(cellule);
    }
    if let Some(organisation_id) = filter.organisation_id {
        qb.push(" AND m.organisation_id = ").push_bind(organisation_id);
    }
}

impl Member {
    pub fn location(&self) -> Location {
        Location {
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members m WHERE m.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Page of members matching `filter`, with the total match count.
    pub async fn list(
        pool: &PgPool,
        filter: &MemberFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM members m");
        push_member_filters(&mut count_qb, filter);
        let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {MEMBER_COLUMNS} FROM members m"));
        push_member_filters(&mut qb, filter);
        qb.push(" ORDER BY m.last_name, m.first_name, m.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let members = qb.build_query_as::<Member>().fetch_all(pool).await?;

        Ok((members, total))
    }

    /// Inserts a member at a normalised `location`. Status starts as pending.
    pub async fn create<'e, E>(
        executor: E,
        data: &CreateMember,
        location: &Location,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Member>(&format!(
            r#"INSERT INTO members AS m (
                   first_name, last_name, email, phone, gender, birth_date, profession,
                   region_id, prefecture_id, commune_id, organisation_id, cellule
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               RETURNING {MEMBER_COLUMNS}"#
        ))
        .bind(data.first_name.trim())
        .bind(data.last_name.trim())
        .bind(data.email.as_deref().map(str::trim))
        .bind(data.phone.as_deref())
        .bind(data.gender.as_deref())
        .bind(data.birth_date)
        .bind(data.profession.as_deref())
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .bind(data.organisation_id)
        .bind(data.cellule)
        .fetch_one(executor)
        .await
    }

    /// Applies the provided fields; `location` replaces the geography when set.
    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: &UpdateMember,
        location: Option<&Location>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let relocate = location.is_some();
        let location = location.copied().unwrap_or_default();
        sqlx::query_as::<_, Member>(&format!(
            r#"UPDATE members AS m SET
                   first_name = COALESCE($2, m.first_name),
                   last_name = COALESCE($3, m.last_name),
                   email = COALESCE($4, m.email),
                   phone = COALESCE($5, m.phone),
                   gender = COALESCE($6, m.gender),
                   birth_date = COALESCE($7, m.birth_date),
                   profession = COALESCE($8, m.profession),
                   region_id = CASE WHEN $9 THEN $10 ELSE m.region_id END,
                   prefecture_id = CASE WHEN $9 THEN $11 ELSE m.prefecture_id END,
                   commune_id = CASE WHEN $9 THEN $12 ELSE m.commune_id END,
                   organisation_id = COALESCE($13, m.organisation_id),
                   cellule = COALESCE($14, m.cellule),
                   updated_at = NOW()
               WHERE m.id = $1
               RETURNING {MEMBER_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.first_name.as_deref())
        .bind(data.last_name.as_deref())
        .bind(data.email.as_deref())
        .bind(data.phone.as_deref())
        .bind(data.gender.as_deref())
        .bind(data.birth_date)
        .bind(data.profession.as_deref())
        .bind(relocate)
        .bind(location.region_id)
        .bind(location.prefecture_id)
        .bind(location.commune_id)
        .bind(data.organisation_id)
        .bind(data.cellule)
        .fetch_optional(executor)
        .await
    }

    /// Moves a member from `from` to `to`. Returns `None` when the member is
    /// no longer in `from`. Validation assigns a membership number once.
    pub async fn transition<'e, E>(
        executor: E,
        id: Uuid,
        from: MemberStatus,
        to: MemberStatus,
        actor_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Member>(&format!(
            r#"UPDATE members AS m SET
                   status = $3,
                   membership_number = CASE
                       WHEN $3 = 'validated'::member_status THEN COALESCE(
                           m.membership_number,
                           'CZI-' || to_char(NOW(), 'YYYY') || '-'
                               || lpad(nextval('membership_number_seq')::text, 6, '0'))
                       ELSE m.membership_number
                   END,
                   validated_at = CASE WHEN $3 = 'validated'::member_status THEN NOW() ELSE m.validated_at END,
                   validated_by = CASE WHEN $3 = 'validated'::member_status THEN $4 ELSE m.validated_by END,
                   status_reason = $5,
                   updated_at = NOW()
               WHERE m.id = $1 AND m.status = $2
               RETURNING {MEMBER_COLUMNS}"#
        ))
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(actor_id)
        .bind(reason)
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_by_organisation(
        pool: &PgPool,
        organisation_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM members WHERE organisation_id = $1")
            .bind(organisation_id)
            .fetch_one(pool)
            .await
    }

    /// Members in `scope` with a usable email, one row per address
    /// (case-insensitive), oldest member first.
    pub async fn find_reachable(
        pool: &PgPool,
        scope: &AudienceScope,
        status: Option<MemberStatus>,
        cellule: Option<Cellule>,
    ) -> Result<Vec<ReachableMember>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"SELECT DISTINCT ON (lower(m.email))
                   m.id AS member_id, trim(m.email) AS email, m.first_name, m.last_name,
                   m.membership_number
               FROM members m
               WHERE m.email IS NOT NULL AND trim(m.email) <> '' AND "#,
        );
        scope.push_location_filter(&mut qb, "m");
        if let Some(status) = status {
            qb.push(" AND m.status = ").push_bind(status);
        }
        if let Some(cellule) = cellule {
            qb.push(" AND m.cellule = ").push_bind(cellule);
        }
        qb.push(" ORDER BY lower(m.email), m.created_at");
        qb.build_query_as::<ReachableMember>().fetch_all(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use MemberStatus::*;
        assert!(Pending.can_transition_to(Validated));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Validated.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Validated));

        assert!(!Rejected.can_transition_to(Validated));
        assert!(!Validated.can_transition_to(Pending));
        assert!(!Suspended.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" diallo "), "%diallo%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn list_filters_build_expected_sql() {
        let filter = MemberFilter {
            search: Some("kone".to_string()),
            status: Some(MemberStatus::Validated),
            cellule: None,
            organisation_id: None,
            scope: AudienceScope::Region(Uuid::new_v4()),
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM members m");
        push_member_filters(&mut qb, &filter);
        let sql = qb.sql();
        assert!(sql.starts_with("SELECT COUNT(*) FROM members m WHERE m.region_id = $1 AND ("));
        assert!(sql.ends_with("AND m.status = $7"));
    }
}
