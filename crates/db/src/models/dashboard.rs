use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use ts_rs::TS;
use uuid::Uuid;

use crate::scope::AudienceScope;

/// A labelled count, e.g. members per status.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, TS)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, TS)]
pub struct RegionCount {
    pub region_id: Option<Uuid>,
    pub region_name: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct DashboardSummary {
    pub members_total: i64,
    pub members_by_status: Vec<CountBucket>,
    pub members_by_cellule: Vec<CountBucket>,
    pub members_by_region: Vec<RegionCount>,
    pub organisations: i64,
    pub published_announcements: i64,
    pub campaigns_by_status: Vec<CountBucket>,
    pub emails_sent_last_30_days: i64,
    pub pending_onboarding: i64,
}

pub struct Dashboard;

impl Dashboard {
    /// Aggregates for everything located inside `authority`.
    pub async fn summary(
        pool: &PgPool,
        authority: &AudienceScope,
    ) -> Result<DashboardSummary, sqlx::Error> {
        let members_by_status = Self::buckets(
            pool,
            authority,
            "SELECT m.status::text AS key, COUNT(*) AS count FROM members m WHERE ",
            "m",
            " GROUP BY m.status ORDER BY m.status",
        )
        .await?;
        let members_by_cellule = Self::buckets(
            pool,
            authority,
            "SELECT COALESCE(m.cellule::text, 'none') AS key, COUNT(*) AS count FROM members m WHERE ",
            "m",
            " GROUP BY m.cellule ORDER BY m.cellule NULLS LAST",
        )
        .await?;
        let campaigns_by_status = Self::buckets(
            pool,
            authority,
            "SELECT e.status::text AS key, COUNT(*) AS count FROM email_campaigns e WHERE ",
            "e",
            " GROUP BY e.status ORDER BY e.status",
        )
        .await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            r#"SELECT m.region_id, r.name AS region_name, COUNT(*) AS count
               FROM members m
               LEFT JOIN regions r ON r.id = m.region_id
               WHERE "#,
        );
        authority.push_location_filter(&mut qb, "m");
        qb.push(" GROUP BY m.region_id, r.name ORDER BY r.name NULLS LAST");
        let members_by_region = qb.build_query_as::<RegionCount>().fetch_all(pool).await?;

        let organisations = Self::scalar(
            pool,
            authority,
            "SELECT COUNT(*) FROM organisations o WHERE o.is_active AND ",
            "o",
            "",
        )
        .await?;
        let published_announcements = Self::scalar(
            pool,
            authority,
            r#"SELECT COUNT(DISTINCT a.id) FROM announcements a
               JOIN announcement_scopes s ON s.announcement_id = a.id
               WHERE a.status = 'published' AND "#,
            "s",
            "",
        )
        .await?;
        let emails_sent_last_30_days = Self::scalar(
            pool,
            authority,
            r#"SELECT COUNT(*) FROM email_campaign_recipients r
               JOIN email_campaigns e ON e.id = r.campaign_id
               WHERE r.status = 'sent' AND r.sent_at >= NOW() - INTERVAL '30 days' AND "#,
            "e",
            "",
        )
        .await?;
        let pending_onboarding = Self::scalar(
            pool,
            authority,
            r#"SELECT COUNT(*) FROM onboarding_submissions o
               JOIN members m ON m.id = o.member_id
               WHERE o.status = 'pending' AND "#,
            "m",
            "",
        )
        .await?;

        let members_total = members_by_status.iter().map(|b| b.count).sum();

        Ok(DashboardSummary {
            members_total,
            members_by_status,
            members_by_cellule,
            members_by_region,
            organisations,
            published_announcements,
            campaigns_by_status,
            emails_sent_last_30_days,
            pending_onboarding,
        })
    }

    async fn buckets(
        pool: &PgPool,
        authority: &AudienceScope,
        head: &str,
        alias: &str,
        tail: &str,
    ) -> Result<Vec<CountBucket>, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(head);
        authority.push_location_filter(&mut qb, alias);
        qb.push(tail);
        qb.build_query_as::<CountBucket>().fetch_all(pool).await
    }

    async fn scalar(
        pool: &PgPool,
        authority: &AudienceScope,
        head: &str,
        alias: &str,
        tail: &str,
    ) -> Result<i64, sqlx::Error> {
        let mut qb = QueryBuilder::<Postgres>::new(head);
        authority.push_location_filter(&mut qb, alias);
        qb.push(tail);
        qb.build_query_scalar::<i64>().fetch_one(pool).await
    }
}
