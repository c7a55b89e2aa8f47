//! Email campaigns: authoring, recipient queueing and delivery.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        email_campaign::{
            CampaignRecipient, CampaignStatus, CreateEmailCampaign, EmailCampaign,
            RecipientCounts, RecipientStatus, UpdateEmailCampaign,
        },
        member::{Member, MemberStatus, ReachableMember},
    },
    scope::{AudienceScope, ScopeTarget},
};
use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use ts_rs::TS;
use utils::pagination::{Page, Pagination};
use uuid::Uuid;

use super::{
    access::{AccessError, Actor},
    email::{EmailProvider, OutgoingEmail},
};

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("campaign not found")]
    NotFound,
    #[error("cannot {action} a campaign that is {status}")]
    InvalidState {
        status: CampaignStatus,
        action: &'static str,
    },
    #[error("no member in the audience has an email address")]
    NoRecipients,
    #[error("invalid campaign: {0}")]
    Validation(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct ScheduleCampaign {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct CampaignQuery {
    pub status: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct RecipientQuery {
    pub status: Option<RecipientStatus>,
}

/// Result of draining one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub sent: u64,
    pub failed: u64,
    /// Sends whose result could not be stored; left claimed.
    pub unrecorded: u64,
    pub expired: u64,
    pub settled: Option<CampaignStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Failed,
    Unrecorded,
}

fn record_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(3)
}

/// Drops repeated addresses, comparing case-insensitively. First wins.
pub fn dedupe_by_email(members: Vec<ReachableMember>) -> Vec<ReachableMember> {
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter(|m| {
            let email = m.email.trim().to_lowercase();
            !email.is_empty() && seen.insert(email)
        })
        .collect()
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Substitutes `{{ name }}` placeholders. Unknown placeholders are kept as
/// written; values are HTML-escaped when `html` is set.
pub fn render_template(template: &str, vars: &[(&str, &str)], html: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match vars.iter().find(|(name, _)| *name == key) {
            Some((_, value)) if html => out.push_str(&escape_html(value)),
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Personalised message for one recipient.
pub fn personalise(campaign: &EmailCampaign, recipient: &CampaignRecipient) -> OutgoingEmail {
    let first_name = recipient.first_name.as_deref().unwrap_or_default();
    let last_name = recipient.last_name.as_deref().unwrap_or_default();
    let number = recipient.membership_number.as_deref().unwrap_or_default();
    let vars = [
        ("first_name", first_name),
        ("last_name", last_name),
        ("membership_number", number),
    ];
    let full_name = format!("{first_name} {last_name}").trim().to_string();

    OutgoingEmail {
        to: recipient.email.clone(),
        to_name: (!full_name.is_empty()).then_some(full_name),
        subject: render_template(&campaign.subject, &vars, false),
        html: render_template(&campaign.html_body, &vars, true),
        text: campaign
            .text_body
            .as_deref()
            .map(|text| render_template(text, &vars, false)),
    }
}

#[derive(Clone)]
pub struct CampaignService {
    db: DBService,
    provider: Arc<dyn EmailProvider>,
    batch_size: i64,
    lease_secs: f64,
}

impl CampaignService {
    /// Worst case for one send: every attempt hits the request timeout.
    const SECS_PER_SEND: f64 = 120.0;

    pub fn new(db: DBService, provider: Arc<dyn EmailProvider>, batch_size: i64) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            db,
            provider,
            batch_size,
            lease_secs: (batch_size as f64 * Self::SECS_PER_SEND).max(900.0),
        }
    }

    async fn resolve_scope(
        &self,
        actor: &Actor,
        target: Option<&ScopeTarget>,
    ) -> Result<ScopeTarget, CampaignError> {
        let scope = match target {
            Some(target) => target.resolve().map_err(AccessError::from)?,
            None => AudienceScope::All,
        };
        let location = actor.ensure_covers(&self.db.pool, &scope).await?;
        Ok(ScopeTarget::stored(scope, &location))
    }

    async fn find_managed(&self, actor: &Actor, id: Uuid) -> Result<EmailCampaign, CampaignError> {
        let authority = actor.require_staff()?;
        let campaign = EmailCampaign::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(CampaignError::NotFound)?;
        let target = campaign.scope_target();
        let covered = target
            .resolve()
            .is_ok_and(|scope| authority.covers(&scope, &target.location()));
        if !covered {
            return Err(CampaignError::NotFound);
        }
        Ok(campaign)
    }

    pub async fn create(
        &self,
        actor: &Actor,
        mut data: CreateEmailCampaign,
    ) -> Result<EmailCampaign, CampaignError> {
        if data.subject.trim().is_empty() || data.html_body.trim().is_empty() {
            return Err(CampaignError::Validation(
                "subject and html_body are required".to_string(),
            ));
        }
        let scope = self.resolve_scope(actor, data.scope.as_ref()).await?;
        data.member_status.get_or_insert(MemberStatus::Validated);
        let campaign = EmailCampaign::create(&self.db.pool, actor.profile_id, &data, &scope).await?;
        info!(campaign_id = %campaign.id, actor_id = %actor.profile_id, "Campaign created");
        Ok(campaign)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<EmailCampaign, CampaignError> {
        self.find_managed(actor, id).await
    }

    pub async fn list(
        &self,
        actor: &Actor,
        query: &CampaignQuery,
        pagination: &Pagination,
    ) -> Result<Page<EmailCampaign>, CampaignError> {
        let authority = actor.require_staff()?;
        let (campaigns, total) = EmailCampaign::list(
            &self.db.pool,
            &authority,
            query.status,
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
        Ok(Page::new(campaigns, total, pagination))
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        data: UpdateEmailCampaign,
    ) -> Result<EmailCampaign, CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        if !campaign.status.is_editable() {
            return Err(CampaignError::InvalidState {
                status: campaign.status,
                action: "edit",
            });
        }
        if data.subject.as_deref().is_some_and(|s| s.trim().is_empty())
            || data.html_body.as_deref().is_some_and(|s| s.trim().is_empty())
        {
            return Err(CampaignError::Validation(
                "subject and html_body cannot be blank".to_string(),
            ));
        }
        let scope = match data.scope.as_ref() {
            Some(target) => Some(self.resolve_scope(actor, Some(target)).await?),
            None => None,
        };
        EmailCampaign::update_draft(&self.db.pool, id, &data, scope.as_ref())
            .await?
            .ok_or(CampaignError::InvalidState {
                status: campaign.status,
                action: "edit",
            })
    }

    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        if !campaign.status.is_editable()
            || EmailCampaign::delete_draft(&self.db.pool, id).await? == 0
        {
            return Err(CampaignError::InvalidState {
                status: campaign.status,
                action: "delete",
            });
        }
        info!(campaign_id = %id, actor_id = %actor.profile_id, "Campaign deleted");
        Ok(())
    }

    pub async fn schedule(
        &self,
        actor: &Actor,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<EmailCampaign, CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        if !campaign.status.can_schedule() {
            return Err(CampaignError::InvalidState {
                status: campaign.status,
                action: "schedule",
            });
        }
        if at <= Utc::now() {
            return Err(CampaignError::Validation(
                "scheduled_at must be in the future".to_string(),
            ));
        }
        let scheduled = EmailCampaign::schedule(&self.db.pool, id, at)
            .await?
            .ok_or(CampaignError::InvalidState {
                status: campaign.status,
                action: "schedule",
            })?;
        info!(campaign_id = %id, scheduled_at = %at, "Campaign scheduled");
        Ok(scheduled)
    }

    pub async fn unschedule(&self, actor: &Actor, id: Uuid) -> Result<EmailCampaign, CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        EmailCampaign::unschedule(&self.db.pool, id)
            .await?
            .ok_or(CampaignError::InvalidState {
                status: campaign.status,
                action: "unschedule",
            })
    }

    /// Queues the audience and hands the campaign to the dispatcher.
    pub async fn send_now(&self, actor: &Actor, id: Uuid) -> Result<EmailCampaign, CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        if !campaign.status.can_send() {
            return Err(CampaignError::InvalidState {
                status: campaign.status,
                action: "send",
            });
        }
        let audience = self.audience(&campaign).await?;
        if audience.is_empty() {
            return Err(CampaignError::NoRecipients);
        }
        let sending = self
            .start_with_audience(
                &campaign,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                &audience,
            )
            .await?
            .ok_or(CampaignError::InvalidState {
                status: campaign.status,
                action: "send",
            })?;
        info!(
            campaign_id = %id,
            queued = audience.len(),
            actor_id = %actor.profile_id,
            "Campaign sending"
        );
        Ok(sending)
    }

    /// Re-queues failed recipients of a finished campaign.
    pub async fn retry_failed(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<EmailCampaign, CampaignError> {
        let campaign = self.find_managed(actor, id).await?;
        if !campaign.status.can_retry() {
            return Err(CampaignError::InvalidState {
                status: campaign.status,
                action: "retry",
            });
        }
        let mut tx = self.db.pool.begin().await?;
        let sending = EmailCampaign::start_sending(
            &mut *tx,
            id,
            &[CampaignStatus::PartiallySent, CampaignStatus::Failed],
        )
        .await?
        .ok_or(CampaignError::InvalidState {
            status: campaign.status,
            action: "retry",
        })?;
        let requeued = CampaignRecipient::requeue_failed(&mut *tx, id).await?;
        tx.commit().await?;
        info!(campaign_id = %id, requeued, "Campaign retrying failed recipients");
        Ok(sending)
    }

    pub async fn stats(&self, actor: &Actor, id: Uuid) -> Result<RecipientCounts, CampaignError> {
        self.find_managed(actor, id).await?;
        Ok(CampaignRecipient::counts(&self.db.pool, id).await?)
    }

    pub async fn recipients(
        &self,
        actor: &Actor,
        id: Uuid,
        query: &RecipientQuery,
        pagination: &Pagination,
    ) -> Result<Page<CampaignRecipient>, CampaignError> {
        self.find_managed(actor, id).await?;
        let (recipients, total) = CampaignRecipient::list(
            &self.db.pool,
            id,
            query.status,
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
        Ok(Page::new(recipients, total, pagination))
    }

    /// Current audience of the campaign, one entry per address.
    async fn audience(&self, campaign: &EmailCampaign) -> Result<Vec<ReachableMember>, CampaignError> {
        let target = campaign.scope_target();
        let scope = target.resolve().map_err(AccessError::from)?;
        let audience = Member::find_reachable(
            &self.db.pool,
            &scope,
            campaign.member_status,
            campaign.cellule,
        )
        .await?;
        Ok(dedupe_by_email(audience))
    }

    /// Moves the campaign from one of `from` to `sending` and upserts the
    /// audience in the same transaction. `None` if the campaign was no
    /// longer in one of `from`; nothing is queued then.
    async fn start_with_audience(
        &self,
        campaign: &EmailCampaign,
        from: &[CampaignStatus],
        audience: &[ReachableMember],
    ) -> Result<Option<EmailCampaign>, CampaignError> {
        let mut tx = self.db.pool.begin().await?;
        let Some(sending) = EmailCampaign::start_sending(&mut *tx, campaign.id, from).await? else {
            return Ok(None);
        };
        let upserted = CampaignRecipient::queue(&mut *tx, campaign.id, audience).await?;
        tx.commit().await?;
        debug!(
            campaign_id = %campaign.id,
            audience = audience.len(),
            upserted,
            "Recipients queued"
        );
        Ok(Some(sending))
    }

    /// Moves due scheduled campaigns to `sending`. Returns how many started.
    /// A failing campaign is logged and skipped.
    pub async fn start_due(&self, now: DateTime<Utc>) -> Result<usize, CampaignError> {
        let due = EmailCampaign::find_due_scheduled(&self.db.pool, now).await?;
        let mut started = 0;
        for campaign in due {
            let result = match self.audience(&campaign).await {
                Ok(audience) => self
                    .start_with_audience(&campaign, &[CampaignStatus::Scheduled], &audience)
                    .await
                    .map(|sending| sending.map(|_| audience.len())),
                Err(e) => Err(e),
            };
            match result {
                Ok(Some(queued)) => {
                    info!(campaign_id = %campaign.id, queued, "Scheduled campaign started");
                    started += 1;
                }
                Ok(None) => {
                    debug!(campaign_id = %campaign.id, "Scheduled campaign changed before start");
                }
                Err(e) => {
                    warn!(campaign_id = %campaign.id, error = %e, "Failed to start scheduled campaign");
                }
            }
        }
        Ok(started)
    }

    /// Campaigns currently being delivered.
    pub async fn sending(&self) -> Result<Vec<EmailCampaign>, CampaignError> {
        Ok(EmailCampaign::find_sending(&self.db.pool).await?)
    }

    /// Sends every claimable pending recipient, then stores counts and
    /// settles the campaign once nothing is pending.
    pub async fn drain(&self, campaign: &EmailCampaign) -> Result<DrainOutcome, CampaignError> {
        let expired =
            CampaignRecipient::expire_stale_claims(&self.db.pool, campaign.id, self.lease_secs)
                .await?;
        if expired > 0 {
            warn!(campaign_id = %campaign.id, expired, "Expired stale recipient claims");
        }

        let mut sent = 0;
        let mut failed = 0;
        let mut unrecorded = 0;
        loop {
            let batch =
                CampaignRecipient::claim_batch(&self.db.pool, campaign.id, self.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            for recipient in &batch {
                match self.deliver(campaign, recipient).await {
                    Delivery::Sent => sent += 1,
                    Delivery::Failed => failed += 1,
                    Delivery::Unrecorded => unrecorded += 1,
                }
            }
        }

        let counts = CampaignRecipient::counts(&self.db.pool, campaign.id).await?;
        let settled = CampaignStatus::settle(&counts);
        EmailCampaign::record_progress(&self.db.pool, campaign.id, &counts, settled).await?;
        if let Some(status) = settled {
            info!(
                campaign_id = %campaign.id,
                status = %status,
                sent = counts.sent,
                failed = counts.failed,
                "Campaign finished"
            );
        }
        Ok(DrainOutcome {
            sent,
            failed,
            unrecorded,
            expired,
            settled,
        })
    }

    /// Sends one message and records the result. A result that cannot be
    /// stored leaves the claim in place, so the row is not sent again.
    async fn deliver(&self, campaign: &EmailCampaign, recipient: &CampaignRecipient) -> Delivery {
        let email = personalise(campaign, recipient);
        let (delivery, recorded) = match self.provider.send(&email).await {
            Ok(receipt) => {
                let recorded = (|| async {
                    CampaignRecipient::mark_sent(
                        &self.db.pool,
                        recipient.id,
                        receipt.message_id.as_deref(),
                    )
                    .await
                })
                .retry(record_backoff())
                .await;
                (Delivery::Sent, recorded)
            }
            Err(e) => {
                warn!(
                    campaign_id = %campaign.id,
                    recipient_id = %recipient.id,
                    provider = %self.provider.kind(),
                    error = %e,
                    "Email delivery failed"
                );
                let message = e.to_string();
                let recorded = (|| async {
                    CampaignRecipient::mark_failed(&self.db.pool, recipient.id, &message).await
                })
                .retry(record_backoff())
                .await;
                (Delivery::Failed, recorded)
            }
        };
        match recorded {
            Ok(_) => delivery,
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    recipient_id = %recipient.id,
                    outcome = ?delivery,
                    error = %e,
                    "Could not record delivery result"
                );
                Delivery::Unrecorded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use db::{
        models::profile::UserRole,
        scope::{Location, ScopeType},
    };
    use sqlx::PgPool;

    use super::*;
    use crate::services::email::{DeliveryReceipt, EmailError, EmailProviderKind};

    /// Records every address it is asked to send to and rejects `failing`.
    #[derive(Default)]
    struct RecordingProvider {
        failing: Vec<String>,
        sent_to: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn failing(addresses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            })
        }

        fn sent_to(&self) -> Vec<String> {
            let mut sent = self.sent_to.lock().unwrap().clone();
            sent.sort();
            sent
        }
    }

    #[async_trait]
    impl EmailProvider for RecordingProvider {
        fn kind(&self) -> EmailProviderKind {
            EmailProviderKind::Log
        }

        async fn send(&self, email: &OutgoingEmail) -> Result<DeliveryReceipt, EmailError> {
            self.sent_to.lock().unwrap().push(email.to.clone());
            if self.failing.contains(&email.to) {
                return Err(EmailError::Http {
                    status: 422,
                    body: "mailbox rejected".to_string(),
                });
            }
            Ok(DeliveryReceipt {
                message_id: Some(format!("stub-{}", email.to)),
            })
        }
    }

    async fn super_admin(pool: &PgPool) -> Actor {
        let profile_id = Uuid::new_v4();
        sqlx::query("INSERT INTO profiles (id, role) VALUES ($1, 'super_admin')")
            .bind(profile_id)
            .execute(pool)
            .await
            .unwrap();
        Actor {
            profile_id,
            email: None,
            role: UserRole::SuperAdmin,
            member_id: None,
            location: Location::default(),
        }
    }

    async fn add_member(pool: &PgPool, email: Option<&str>, status: MemberStatus) {
        sqlx::query(
            "INSERT INTO members (first_name, last_name, email, status)
             VALUES ('Awa', 'Keita', $1, $2)",
        )
        .bind(email)
        .bind(status)
        .execute(pool)
        .await
        .unwrap();
    }

    fn new_campaign() -> CreateEmailCampaign {
        CreateEmailCampaign {
            subject: "Assemblée générale".to_string(),
            html_body: "<p>Bonjour {{first_name}}</p>".to_string(),
            text_body: None,
            scope: None,
            member_status: None,
            cellule: None,
        }
    }

    fn service(pool: &PgPool, provider: Arc<RecordingProvider>) -> CampaignService {
        CampaignService::new(DBService { pool: pool.clone() }, provider, 2)
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn drain_sends_once_and_settles_with_counts(pool: PgPool) {
        let actor = super_admin(&pool).await;
        add_member(&pool, Some("awa@example.org"), MemberStatus::Validated).await;
        add_member(&pool, Some("moussa@example.org"), MemberStatus::Validated).await;
        add_member(&pool, Some("bounce@example.org"), MemberStatus::Validated).await;
        add_member(&pool, Some("pending@example.org"), MemberStatus::Pending).await;
        add_member(&pool, None, MemberStatus::Validated).await;

        let provider = RecordingProvider::failing(&["bounce@example.org"]);
        let campaigns = service(&pool, provider.clone());
        let campaign = campaigns.create(&actor, new_campaign()).await.unwrap();
        let sending = campaigns.send_now(&actor, campaign.id).await.unwrap();
        assert_eq!(sending.status, CampaignStatus::Sending);

        let outcome = campaigns.drain(&sending).await.unwrap();
        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.unrecorded, 0);
        assert_eq!(outcome.settled, Some(CampaignStatus::PartiallySent));
        assert_eq!(
            provider.sent_to(),
            vec!["awa@example.org", "bounce@example.org", "moussa@example.org"]
        );

        let stored = campaigns.get(&actor, campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::PartiallySent);
        assert_eq!(
            (stored.total_recipients, stored.sent_count, stored.failed_count),
            (3, 2, 1)
        );
        assert!(matches!(
            campaigns.send_now(&actor, campaign.id).await,
            Err(CampaignError::InvalidState { .. })
        ));

        // A retry only resends the failed address.
        let retrying = campaigns.retry_failed(&actor, campaign.id).await.unwrap();
        assert_eq!(retrying.status, CampaignStatus::Sending);
        let outcome = campaigns.drain(&retrying).await.unwrap();
        assert_eq!((outcome.sent, outcome.failed), (0, 1));
        let sent_to = provider.sent_to();
        assert_eq!(sent_to.len(), 4);
        assert_eq!(sent_to.iter().filter(|a| *a == "awa@example.org").count(), 1);

        let failed = CampaignRecipient::list(
            &pool,
            campaign.id,
            Some(RecipientStatus::Failed),
            10,
            0,
        )
        .await
        .unwrap();
        assert_eq!(failed.1, 1);
        assert_eq!(failed.0[0].attempts, 2);
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn empty_audience_leaves_the_draft_alone(pool: PgPool) {
        let actor = super_admin(&pool).await;
        add_member(&pool, None, MemberStatus::Validated).await;
        let campaigns = service(&pool, RecordingProvider::failing(&[]));
        let campaign = campaigns.create(&actor, new_campaign()).await.unwrap();

        assert!(matches!(
            campaigns.send_now(&actor, campaign.id).await,
            Err(CampaignError::NoRecipients)
        ));
        let stored = campaigns.get(&actor, campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert_eq!(
            CampaignRecipient::counts(&pool, campaign.id).await.unwrap().total,
            0
        );
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn retry_after_settling_elsewhere_queues_nothing(pool: PgPool) {
        let actor = super_admin(&pool).await;
        add_member(&pool, Some("bounce@example.org"), MemberStatus::Validated).await;
        let campaigns = service(&pool, RecordingProvider::failing(&["bounce@example.org"]));
        let campaign = campaigns.create(&actor, new_campaign()).await.unwrap();
        let sending = campaigns.send_now(&actor, campaign.id).await.unwrap();
        let outcome = campaigns.drain(&sending).await.unwrap();
        assert_eq!(outcome.settled, Some(CampaignStatus::Failed));

        // Moved on by another request.
        sqlx::query("UPDATE email_campaigns SET status = 'sent' WHERE id = $1")
            .bind(campaign.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            campaigns.retry_failed(&actor, campaign.id).await,
            Err(CampaignError::InvalidState { .. })
        ));
        let counts = CampaignRecipient::counts(&pool, campaign.id).await.unwrap();
        assert_eq!((counts.pending, counts.failed), (0, 1));
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn due_campaigns_start_and_drain(pool: PgPool) {
        let actor = super_admin(&pool).await;
        add_member(&pool, Some("awa@example.org"), MemberStatus::Validated).await;
        let provider = RecordingProvider::failing(&[]);
        let campaigns = service(&pool, provider.clone());
        let campaign = campaigns.create(&actor, new_campaign()).await.unwrap();
        sqlx::query(
            "UPDATE email_campaigns
             SET status = 'scheduled', scheduled_at = NOW() - INTERVAL '1 minute'
             WHERE id = $1",
        )
        .bind(campaign.id)
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(campaigns.start_due(Utc::now()).await.unwrap(), 1);
        assert_eq!(campaigns.start_due(Utc::now()).await.unwrap(), 0);

        let sending = campaigns.sending().await.unwrap();
        assert_eq!(sending.len(), 1);
        let outcome = campaigns.drain(&sending[0]).await.unwrap();
        assert_eq!(outcome.settled, Some(CampaignStatus::Sent));
        assert_eq!(provider.sent_to(), vec!["awa@example.org"]);
    }

    fn reachable(email: &str) -> ReachableMember {
        ReachableMember {
            member_id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Awa".to_string(),
            last_name: "Keita".to_string(),
            membership_number: None,
        }
    }

    fn campaign(subject: &str, html: &str, text: Option<&str>) -> EmailCampaign {
        let now = Utc::now();
        EmailCampaign {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            html_body: html.to_string(),
            text_body: text.map(str::to_string),
            status: CampaignStatus::Sending,
            scope_type: ScopeType::All,
            region_id: None,
            prefecture_id: None,
            commune_id: None,
            member_status: Some(MemberStatus::Validated),
            cellule: None,
            created_by: Uuid::new_v4(),
            scheduled_at: None,
            started_at: Some(now),
            completed_at: None,
            total_recipients: 0,
            sent_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn recipient(first: Option<&str>, number: Option<&str>) -> CampaignRecipient {
        let now = Utc::now();
        CampaignRecipient {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            member_id: None,
            email: "awa@example.org".to_string(),
            first_name: first.map(str::to_string),
            last_name: Some("Keita".to_string()),
            membership_number: number.map(str::to_string),
            status: RecipientStatus::Pending,
            attempts: 0,
            provider_message_id: None,
            error_message: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn dedupe_is_case_insensitive() {
        let members = vec![
            reachable("Awa@Example.org"),
            reachable("awa@example.org "),
            reachable("moussa@example.org"),
            reachable("  "),
        ];
        let deduped = dedupe_by_email(members);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].email, "Awa@Example.org");
    }

    #[test]
    fn placeholders_are_substituted() {
        let vars = [("first_name", "Awa"), ("membership_number", "CZI-2026-000042")];
        assert_eq!(
            render_template("Bonjour {{first_name}}, n° {{ membership_number }}", &vars, false),
            "Bonjour Awa, n° CZI-2026-000042"
        );
    }

    #[test]
    fn unknown_or_unclosed_placeholders_stay() {
        let vars = [("first_name", "Awa")];
        assert_eq!(
            render_template("{{unknown}} {{first_name}} {{oops", &vars, false),
            "{{unknown}} Awa {{oops"
        );
    }

    #[test]
    fn html_values_are_escaped() {
        let vars = [("first_name", "<b>Awa</b> & co")];
        assert_eq!(
            render_template("<p>{{first_name}}</p>", &vars, true),
            "<p>&lt;b&gt;Awa&lt;/b&gt; &amp; co</p>"
        );
        assert_eq!(
            render_template("{{first_name}}", &vars, false),
            "<b>Awa</b> & co"
        );
    }

    #[test]
    fn personalise_fills_every_part() {
        let campaign = campaign(
            "Carte {{membership_number}}",
            "<p>Bonjour {{first_name}} {{last_name}}</p>",
            Some("Bonjour {{first_name}}"),
        );
        let email = personalise(&campaign, &recipient(Some("Awa"), Some("CZI-2026-000001")));
        assert_eq!(email.to, "awa@example.org");
        assert_eq!(email.to_name.as_deref(), Some("Awa Keita"));
        assert_eq!(email.subject, "Carte CZI-2026-000001");
        assert_eq!(email.html, "<p>Bonjour Awa Keita</p>");
        assert_eq!(email.text.as_deref(), Some("Bonjour Awa"));
    }

    #[test]
    fn missing_values_render_empty() {
        let campaign = campaign("{{membership_number}}", "{{first_name}}", None);
        let email = personalise(&campaign, &recipient(None, None));
        assert_eq!(email.subject, "");
        assert_eq!(email.html, "");
        assert_eq!(email.to_name.as_deref(), Some("Keita"));
        assert!(email.text.is_none());
    }
}
