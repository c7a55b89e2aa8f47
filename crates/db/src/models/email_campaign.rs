use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::member::{Cellule, MemberStatus, ReachableMember};
use crate::scope::{AudienceScope, ScopeTarget, ScopeType};

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "campaign_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    PartiallySent,
    Failed,
}

impl CampaignStatus {
    pub fn is_editable(self) -> bool {
        self == CampaignStatus::Draft
    }

    pub fn can_schedule(self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }

    pub fn can_send(self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }

    pub fn can_retry(self) -> bool {
        matches!(self, CampaignStatus::PartiallySent | CampaignStatus::Failed)
    }

    /// Terminal status once nothing is pending; `None` while work remains.
    pub fn settle(counts: &RecipientCounts) -> Option<CampaignStatus> {
        if counts.pending > 0 {
            return None;
        }
        Some(if counts.sent == 0 {
            CampaignStatus::Failed
        } else if counts.failed == 0 {
            CampaignStatus::Sent
        } else {
            CampaignStatus::PartiallySent
        })
    }
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "recipient_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecipientStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct EmailCampaign {
    pub id: Uuid,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub status: CampaignStatus,
    pub scope_type: ScopeType,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
    pub member_status: Option<MemberStatus>,
    pub cellule: Option<Cellule>,
    pub created_by: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateEmailCampaign {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub scope: Option<ScopeTarget>,
    pub member_status: Option<MemberStatus>,
    pub cellule: Option<Cellule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct UpdateEmailCampaign {
    pub subject: Option<String>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub scope: Option<ScopeTarget>,
    pub member_status: Option<MemberStatus>,
    pub cellule: Option<Cellule>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub member_id: Option<Uuid>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub membership_number: Option<String>,
    pub status: RecipientStatus,
    pub attempts: i32,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize, Deserialize, TS)]
pub struct RecipientCounts {
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub failed: i64,
}

const CAMPAIGN_COLUMNS: &str = "e.id, e.subject, e.html_body, e.text_body, e.status, \
     e.scope_type, e.region_id, e.prefecture_id, e.commune_id, e.member_status, e.cellule, \
     e.created_by, e.scheduled_at, e.started_at, e.completed_at, e.total_recipients, \
     e.sent_count, e.failed_count, e.created_at, e.updated_at";

const RECIPIENT_COLUMNS: &str = "r.id, r.campaign_id, r.member_id, r.email, r.first_name, \
     r.last_name, r.membership_number, r.status, r.attempts, r.provider_message_id, \
     r.error_message, r.sent_at, r.created_at, r.updated_at";

/// Error stored on recipients whose delivery was never confirmed.
pub const UNKNOWN_OUTCOME: &str = "delivery outcome unknown: claim expired before the result was recorded";

fn status_texts(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

impl EmailCampaign {
    pub fn scope_target(&self) -> ScopeTarget {
        ScopeTarget {
            scope_type: Some(self.scope_type),
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        }
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM email_campaigns e WHERE e.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Campaigns whose target lies inside `authority`.
    pub async fn list(
        pool: &PgPool,
        authority: &AudienceScope,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        fn push_filters(
            qb: &mut QueryBuilder<'_, Postgres>,
            authority: &AudienceScope,
            status: Option<CampaignStatus>,
        ) {
            qb.push(" WHERE ");
            authority.push_location_filter(qb, "e");
            if let Some(status) = status {
                qb.push(" AND e.status = ").push_bind(status);
            }
        }

        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM email_campaigns e");
        push_filters(&mut count_qb, authority, status);
        let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {CAMPAIGN_COLUMNS} FROM email_campaigns e"));
        push_filters(&mut qb, authority, status);
        qb.push(" ORDER BY e.created_at DESC, e.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let campaigns = qb.build_query_as::<EmailCampaign>().fetch_all(pool).await?;

        Ok((campaigns, total))
    }

    /// `scope` must be in stored form (level plus ancestry).
    pub async fn create(
        pool: &PgPool,
        created_by: Uuid,
        data: &CreateEmailCampaign,
        scope: &ScopeTarget,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"INSERT INTO email_campaigns AS e (
                   subject, html_body, text_body, scope_type, region_id, prefecture_id,
                   commune_id, member_status, cellule, created_by
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(data.subject.trim())
        .bind(&data.html_body)
        .bind(data.text_body.as_deref())
        .bind(scope.scope_type.unwrap_or(ScopeType::All))
        .bind(scope.region_id)
        .bind(scope.prefecture_id)
        .bind(scope.commune_id)
        .bind(data.member_status)
        .bind(data.cellule)
        .bind(created_by)
        .fetch_one(pool)
        .await
    }

    /// Edits a draft. Returns `None` if the campaign is missing or no longer a draft.
    pub async fn update_draft(
        pool: &PgPool,
        id: Uuid,
        data: &UpdateEmailCampaign,
        scope: Option<&ScopeTarget>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"UPDATE email_campaigns AS e SET
                   subject = COALESCE($2, e.subject),
                   html_body = COALESCE($3, e.html_body),
                   text_body = COALESCE($4, e.text_body),
                   scope_type = CASE WHEN $5 THEN $6 ELSE e.scope_type END,
                   region_id = CASE WHEN $5 THEN $7 ELSE e.region_id END,
                   prefecture_id = CASE WHEN $5 THEN $8 ELSE e.prefecture_id END,
                   commune_id = CASE WHEN $5 THEN $9 ELSE e.commune_id END,
                   member_status = COALESCE($10, e.member_status),
                   cellule = COALESCE($11, e.cellule),
                   updated_at = NOW()
               WHERE e.id = $1 AND e.status = 'draft'
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(id)
        .bind(data.subject.as_deref().map(str::trim))
        .bind(data.html_body.as_deref())
        .bind(data.text_body.as_deref())
        .bind(scope.is_some())
        .bind(scope.and_then(|s| s.scope_type).unwrap_or(ScopeType::All))
        .bind(scope.and_then(|s| s.region_id))
        .bind(scope.and_then(|s| s.prefecture_id))
        .bind(scope.and_then(|s| s.commune_id))
        .bind(data.member_status)
        .bind(data.cellule)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete_draft(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM email_campaigns WHERE id = $1 AND status = 'draft'")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Sets `scheduled` with a send time, from draft or scheduled.
    pub async fn schedule(
        pool: &PgPool,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"UPDATE email_campaigns AS e
               SET status = 'scheduled', scheduled_at = $2, updated_at = NOW()
               WHERE e.id = $1 AND e.status IN ('draft', 'scheduled')
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(pool)
        .await
    }

    pub async fn unschedule(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"UPDATE email_campaigns AS e
               SET status = 'draft', scheduled_at = NULL, updated_at = NOW()
               WHERE e.id = $1 AND e.status = 'scheduled'
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Moves the campaign to `sending` if it is currently in one of `from`.
    pub async fn start_sending<'e, E>(
        executor: E,
        id: Uuid,
        from: &[CampaignStatus],
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"UPDATE email_campaigns AS e
               SET status = 'sending',
                   started_at = COALESCE(e.started_at, NOW()),
                   completed_at = NULL,
                   updated_at = NOW()
               WHERE e.id = $1 AND e.status::text = ANY($2)
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(id)
        .bind(status_texts(from))
        .fetch_optional(executor)
        .await
    }

    /// Stores recipient counts and, when `status` is given, closes the run.
    pub async fn record_progress(
        pool: &PgPool,
        id: Uuid,
        counts: &RecipientCounts,
        status: Option<CampaignStatus>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"UPDATE email_campaigns AS e SET
                   total_recipients = $2,
                   sent_count = $3,
                   failed_count = $4,
                   status = COALESCE($5, e.status),
                   completed_at = CASE WHEN $5 IS NULL THEN e.completed_at ELSE NOW() END,
                   updated_at = NOW()
               WHERE e.id = $1 AND e.status = 'sending'
               RETURNING {CAMPAIGN_COLUMNS}"#
        ))
        .bind(id)
        .bind(counts.total)
        .bind(counts.sent)
        .bind(counts.failed)
        .bind(status)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_due_scheduled(
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"SELECT {CAMPAIGN_COLUMNS} FROM email_campaigns e
               WHERE e.status = 'scheduled' AND e.scheduled_at <= $1
               ORDER BY e.scheduled_at"#
        ))
        .bind(now)
        .fetch_all(pool)
        .await
    }

    pub async fn find_sending(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, EmailCampaign>(&format!(
            r#"SELECT {CAMPAIGN_COLUMNS} FROM email_campaigns e
               WHERE e.status = 'sending'
               ORDER BY e.started_at NULLS FIRST"#
        ))
        .fetch_all(pool)
        .await
    }
}

impl CampaignRecipient {
    /// Upserts recipients by `(campaign_id, lower(email))`. New addresses
    /// start pending, failed ones go back to pending, pending and sent rows
    /// are left alone. Returns the number of rows inserted or re-queued.
    pub async fn queue<'e, E>(
        executor: E,
        campaign_id: Uuid,
        members: &[ReachableMember],
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if members.is_empty() {
            return Ok(0);
        }
        let member_ids: Vec<Uuid> = members.iter().map(|m| m.member_id).collect();
        let emails: Vec<String> = members.iter().map(|m| m.email.clone()).collect();
        let first_names: Vec<String> = members.iter().map(|m| m.first_name.clone()).collect();
        let last_names: Vec<String> = members.iter().map(|m| m.last_name.clone()).collect();
        let numbers: Vec<Option<String>> =
            members.iter().map(|m| m.membership_number.clone()).collect();

        let result = sqlx::query(
            r#"INSERT INTO email_campaign_recipients AS r
                   (campaign_id, member_id, email, first_name, last_name, membership_number)
               SELECT $1, u.member_id, u.email, u.first_name, u.last_name, u.membership_number
               FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::text[], $6::text[])
                   AS u(member_id, email, first_name, last_name, membership_number)
               ON CONFLICT (campaign_id, lower(email)) DO UPDATE SET
                   status = 'pending',
                   claimed_at = NULL,
                   error_message = NULL,
                   first_name = EXCLUDED.first_name,
                   last_name = EXCLUDED.last_name,
                   membership_number = EXCLUDED.membership_number,
                   updated_at = NOW()
               WHERE r.status = 'failed'"#,
        )
        .bind(campaign_id)
        .bind(&member_ids)
        .bind(&emails)
        .bind(&first_names)
        .bind(&last_names)
        .bind(&numbers)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// failed → pending for every failed recipient of the campaign.
    pub async fn requeue_failed<'e, E>(executor: E, campaign_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"UPDATE email_campaign_recipients
               SET status = 'pending', claimed_at = NULL, error_message = NULL, updated_at = NOW()
               WHERE campaign_id = $1 AND status = 'failed'"#,
        )
        .bind(campaign_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Leases up to `limit` unclaimed pending recipients.
    pub async fn claim_batch(
        pool: &PgPool,
        campaign_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CampaignRecipient>(&format!(
            r#"UPDATE email_campaign_recipients AS r
               SET claimed_at = NOW(), updated_at = NOW()
               WHERE r.id IN (
                   SELECT id FROM email_campaign_recipients
                   WHERE campaign_id = $1 AND status = 'pending' AND claimed_at IS NULL
                   ORDER BY created_at, id
                   LIMIT $2
                   FOR UPDATE SKIP LOCKED
               )
               RETURNING {RECIPIENT_COLUMNS}"#
        ))
        .bind(campaign_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// pending → failed for leases older than `lease_secs`. The holder may
    /// have sent the message before stopping, so these rows are never
    /// claimed again; only an explicit retry puts them back in the queue.
    pub async fn expire_stale_claims(
        pool: &PgPool,
        campaign_id: Uuid,
        lease_secs: f64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE email_campaign_recipients
               SET status = 'failed', error_message = $3, claimed_at = NULL, updated_at = NOW()
               WHERE campaign_id = $1
                 AND status = 'pending'
                 AND claimed_at < NOW() - make_interval(secs => $2)"#,
        )
        .bind(campaign_id)
        .bind(lease_secs)
        .bind(UNKNOWN_OUTCOME)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// pending → sent. Returns false if the recipient was not pending.
    pub async fn mark_sent(
        pool: &PgPool,
        id: Uuid,
        provider_message_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE email_campaign_recipients
               SET status = 'sent', sent_at = NOW(), provider_message_id = $2,
                   error_message = NULL, attempts = attempts + 1, claimed_at = NULL,
                   updated_at = NOW()
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(provider_message_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// pending → failed. Returns false if the recipient was not pending.
    pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE email_campaign_recipients
               SET status = 'failed', error_message = $2, attempts = attempts + 1,
                   claimed_at = NULL, updated_at = NOW()
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn counts(pool: &PgPool, campaign_id: Uuid) -> Result<RecipientCounts, sqlx::Error> {
        sqlx::query_as::<_, RecipientCounts>(
            r#"SELECT
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                   COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                   COUNT(*) FILTER (WHERE status = 'failed') AS failed
               FROM email_campaign_recipients
               WHERE campaign_id = $1"#,
        )
        .bind(campaign_id)
        .fetch_one(pool)
        .await
    }

    pub async fn list(
        pool: &PgPool,
        campaign_id: Uuid,
        status: Option<RecipientStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let total = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM email_campaign_recipients
               WHERE campaign_id = $1 AND ($2::recipient_status IS NULL OR status = $2)"#,
        )
        .bind(campaign_id)
        .bind(status)
        .fetch_one(pool)
        .await?;

        let recipients = sqlx::query_as::<_, CampaignRecipient>(&format!(
            r#"SELECT {RECIPIENT_COLUMNS} FROM email_campaign_recipients r
               WHERE r.campaign_id = $1 AND ($2::recipient_status IS NULL OR r.status = $2)
               ORDER BY r.email
               LIMIT $3 OFFSET $4"#
        ))
        .bind(campaign_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok((recipients, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pending: i64, sent: i64, failed: i64) -> RecipientCounts {
        RecipientCounts {
            total: pending + sent + failed,
            pending,
            sent,
            failed,
        }
    }

    #[test]
    fn settle_waits_for_pending() {
        assert_eq!(CampaignStatus::settle(&counts(1, 10, 0)), None);
    }

    #[test]
    fn settle_picks_terminal_status() {
        assert_eq!(
            CampaignStatus::settle(&counts(0, 10, 0)),
            Some(CampaignStatus::Sent)
        );
        assert_eq!(
            CampaignStatus::settle(&counts(0, 7, 3)),
            Some(CampaignStatus::PartiallySent)
        );
        assert_eq!(
            CampaignStatus::settle(&counts(0, 0, 3)),
            Some(CampaignStatus::Failed)
        );
        assert_eq!(
            CampaignStatus::settle(&counts(0, 0, 0)),
            Some(CampaignStatus::Failed)
        );
    }

    #[test]
    fn campaign_status_guards() {
        assert!(CampaignStatus::Draft.is_editable());
        assert!(!CampaignStatus::Scheduled.is_editable());
        assert!(CampaignStatus::Scheduled.can_send());
        assert!(!CampaignStatus::Sending.can_send());
        assert!(CampaignStatus::PartiallySent.can_retry());
        assert!(CampaignStatus::Failed.can_retry());
        assert!(!CampaignStatus::Sent.can_retry());
    }

    #[test]
    fn status_text_matches_database_labels() {
        assert_eq!(
            status_texts(&[CampaignStatus::Draft, CampaignStatus::PartiallySent]),
            vec!["draft".to_string(), "partially_sent".to_string()]
        );
    }

    async fn author(pool: &PgPool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO profiles (id, role) VALUES ($1, 'admin')")
            .bind(id)
            .execute(pool)
            .await
            .unwrap();
        id
    }

    async fn draft(pool: &PgPool) -> EmailCampaign {
        let data = CreateEmailCampaign {
            subject: "Assemblée générale".to_string(),
            html_body: "<p>Bonjour {{first_name}}</p>".to_string(),
            text_body: None,
            scope: None,
            member_status: Some(MemberStatus::Validated),
            cellule: None,
        };
        EmailCampaign::create(pool, author(pool).await, &data, &ScopeTarget::all())
            .await
            .unwrap()
    }

    async fn member(pool: &PgPool, email: &str) -> ReachableMember {
        let member_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO members (first_name, last_name, email, status)
             VALUES ('Awa', 'Keita', $1, 'validated') RETURNING id",
        )
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap();
        ReachableMember {
            member_id,
            email: email.to_string(),
            first_name: "Awa".to_string(),
            last_name: "Keita".to_string(),
            membership_number: None,
        }
    }

    async fn recipient_by_email(pool: &PgPool, campaign_id: Uuid, email: &str) -> CampaignRecipient {
        sqlx::query_as::<_, CampaignRecipient>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM email_campaign_recipients r
             WHERE r.campaign_id = $1 AND lower(r.email) = lower($2)"
        ))
        .bind(campaign_id)
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn queue_requeues_failed_and_keeps_sent(pool: PgPool) {
        let campaign = draft(&pool).await;
        let awa = member(&pool, "awa@example.org").await;
        let moussa = member(&pool, "moussa@example.org").await;
        let queued = CampaignRecipient::queue(&pool, campaign.id, &[awa.clone(), moussa.clone()])
            .await
            .unwrap();
        assert_eq!(queued, 2);

        let awa_row = recipient_by_email(&pool, campaign.id, "awa@example.org").await;
        let moussa_row = recipient_by_email(&pool, campaign.id, "moussa@example.org").await;
        assert!(CampaignRecipient::mark_sent(&pool, awa_row.id, Some("msg-1")).await.unwrap());
        assert!(CampaignRecipient::mark_failed(&pool, moussa_row.id, "bounced").await.unwrap());

        let fanta = member(&pool, "fanta@example.org").await;
        let shouting = ReachableMember {
            email: "AWA@Example.org".to_string(),
            ..awa
        };
        let requeued = CampaignRecipient::queue(&pool, campaign.id, &[shouting, moussa, fanta])
            .await
            .unwrap();
        // moussa back to pending, fanta inserted, awa untouched.
        assert_eq!(requeued, 2);

        let counts = CampaignRecipient::counts(&pool, campaign.id).await.unwrap();
        assert_eq!(
            counts,
            RecipientCounts {
                total: 3,
                pending: 2,
                sent: 1,
                failed: 0,
            }
        );
        let awa_row = recipient_by_email(&pool, campaign.id, "awa@example.org").await;
        assert_eq!(awa_row.status, RecipientStatus::Sent);
        assert_eq!(awa_row.provider_message_id.as_deref(), Some("msg-1"));
        let moussa_row = recipient_by_email(&pool, campaign.id, "moussa@example.org").await;
        assert_eq!(moussa_row.status, RecipientStatus::Pending);
        assert!(moussa_row.error_message.is_none());
        assert_eq!(moussa_row.attempts, 1);
    }

    #[sqlx::test]
    async fn claims_do_not_overlap(pool: PgPool) {
        let campaign = draft(&pool).await;
        let mut audience = Vec::new();
        for email in ["a@example.org", "b@example.org", "c@example.org"] {
            audience.push(member(&pool, email).await);
        }
        CampaignRecipient::queue(&pool, campaign.id, &audience).await.unwrap();

        let first = CampaignRecipient::claim_batch(&pool, campaign.id, 2).await.unwrap();
        let second = CampaignRecipient::claim_batch(&pool, campaign.id, 2).await.unwrap();
        let third = CampaignRecipient::claim_batch(&pool, campaign.id, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(third.is_empty());
        assert!(first.iter().all(|r| r.id != second[0].id));
    }

    #[sqlx::test]
    async fn results_only_apply_to_pending_rows(pool: PgPool) {
        let campaign = draft(&pool).await;
        let awa = member(&pool, "awa@example.org").await;
        CampaignRecipient::queue(&pool, campaign.id, &[awa]).await.unwrap();
        let claimed = CampaignRecipient::claim_batch(&pool, campaign.id, 10).await.unwrap();
        let id = claimed[0].id;

        assert!(CampaignRecipient::mark_sent(&pool, id, None).await.unwrap());
        assert!(!CampaignRecipient::mark_sent(&pool, id, None).await.unwrap());
        assert!(!CampaignRecipient::mark_failed(&pool, id, "late").await.unwrap());
        assert_eq!(CampaignRecipient::requeue_failed(&pool, campaign.id).await.unwrap(), 0);

        let row = recipient_by_email(&pool, campaign.id, "awa@example.org").await;
        assert_eq!(row.status, RecipientStatus::Sent);
        assert_eq!(row.attempts, 1);
        assert!(row.sent_at.is_some());
    }

    #[sqlx::test]
    async fn stale_claims_fail_instead_of_resending(pool: PgPool) {
        let campaign = draft(&pool).await;
        let awa = member(&pool, "awa@example.org").await;
        CampaignRecipient::queue(&pool, campaign.id, &[awa]).await.unwrap();
        let claimed = CampaignRecipient::claim_batch(&pool, campaign.id, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // A fresh claim is left alone.
        assert_eq!(
            CampaignRecipient::expire_stale_claims(&pool, campaign.id, 900.0)
                .await
                .unwrap(),
            0
        );
        sqlx::query(
            "UPDATE email_campaign_recipients SET claimed_at = NOW() - INTERVAL '2 hours'
             WHERE campaign_id = $1",
        )
        .bind(campaign.id)
        .execute(&pool)
        .await
        .unwrap();
        assert!(
            CampaignRecipient::claim_batch(&pool, campaign.id, 10)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            CampaignRecipient::expire_stale_claims(&pool, campaign.id, 900.0)
                .await
                .unwrap(),
            1
        );

        let row = recipient_by_email(&pool, campaign.id, "awa@example.org").await;
        assert_eq!(row.status, RecipientStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some(UNKNOWN_OUTCOME));

        assert_eq!(CampaignRecipient::requeue_failed(&pool, campaign.id).await.unwrap(), 1);
        let reclaimed = CampaignRecipient::claim_batch(&pool, campaign.id, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[sqlx::test]
    async fn start_sending_is_guarded_by_status(pool: PgPool) {
        let campaign = draft(&pool).await;
        let started = EmailCampaign::start_sending(&pool, campaign.id, &[CampaignStatus::Draft])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.status, CampaignStatus::Sending);
        assert!(started.started_at.is_some());

        let again = EmailCampaign::start_sending(&pool, campaign.id, &[CampaignStatus::Draft])
            .await
            .unwrap();
        assert!(again.is_none());

        let settled = EmailCampaign::record_progress(
            &pool,
            campaign.id,
            &counts(0, 4, 1),
            Some(CampaignStatus::PartiallySent),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(settled.status, CampaignStatus::PartiallySent);
        assert_eq!((settled.total_recipients, settled.sent_count, settled.failed_count), (5, 4, 1));
        assert!(settled.completed_at.is_some());
    }
}
