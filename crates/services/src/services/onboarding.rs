use db::{
    DBService,
    models::{
        geography::Geography,
        member::{Member, MemberStatus},
        onboarding::{
            OnboardingSubmission, OnboardingSubmissionWithMember, ReviewOnboarding,
            SubmissionStatus, SubmitOnboarding,
        },
        profile::Profile,
    },
    scope::Location,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::{Page, Pagination};
use uuid::Uuid;

use super::{
    access::{AccessError, Actor},
    members::is_unique_violation,
};

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("submission not found")]
    NotFound,
    #[error("a submission is already awaiting review")]
    AlreadyPending,
    #[error("your account is already linked to a member")]
    AlreadyMember,
    #[error("submission has already been reviewed")]
    AlreadyReviewed,
    #[error("applicant is no longer pending")]
    MemberNotPending,
    #[error("invalid submission: {0}")]
    Validation(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct SubmissionQuery {
    pub status: Option<SubmissionStatus>,
}

fn validate_review(review: &ReviewOnboarding) -> Result<Option<&str>, OnboardingError> {
    let reason = review
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    match review.decision {
        SubmissionStatus::Approved => Ok(reason),
        SubmissionStatus::Rejected => reason.map(Some).ok_or_else(|| {
            OnboardingError::Validation("a rejection reason is required".to_string())
        }),
        SubmissionStatus::Pending => Err(OnboardingError::Validation(
            "decision must be approved or rejected".to_string(),
        )),
    }
}

#[derive(Clone)]
pub struct OnboardingService {
    db: DBService,
}

impl OnboardingService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Creates a pending member for the submitter and links it to their
    /// profile.
    pub async fn submit(
        &self,
        actor: &Actor,
        mut data: SubmitOnboarding,
    ) -> Result<OnboardingSubmission, OnboardingError> {
        if OnboardingSubmission::find_pending_by_profile(&self.db.pool, actor.profile_id)
            .await?
            .is_some()
        {
            return Err(OnboardingError::AlreadyPending);
        }
        if actor.member_id.is_some() {
            return Err(OnboardingError::AlreadyMember);
        }
        if data.member.first_name.trim().is_empty() || data.member.last_name.trim().is_empty() {
            return Err(OnboardingError::Validation(
                "first_name and last_name are required".to_string(),
            ));
        }
        if data.member.email.as_deref().is_none_or(|e| e.trim().is_empty()) {
            data.member.email = actor.email.clone();
        }
        if data.answers.is_null() {
            data.answers = serde_json::json!({});
        }

        let requested = Location {
            region_id: data.member.region_id,
            prefecture_id: data.member.prefecture_id,
            commune_id: data.member.commune_id,
        };
        let location = Geography::normalise(&self.db.pool, &requested)
            .await
            .map_err(AccessError::from)?;

        let mut tx = self.db.pool.begin().await?;
        let member = Member::create(&mut *tx, &data.member, &location)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OnboardingError::Validation("this email is already registered".to_string())
                } else {
                    e.into()
                }
            })?;
        Profile::link_member(&mut *tx, actor.profile_id, member.id, &location).await?;
        let submission =
            OnboardingSubmission::create(&mut *tx, actor.profile_id, member.id, &data.answers)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        OnboardingError::AlreadyPending
                    } else {
                        e.into()
                    }
                })?;
        tx.commit().await?;

        info!(
            submission_id = %submission.id,
            member_id = %member.id,
            profile_id = %actor.profile_id,
            "Onboarding submitted"
        );
        Ok(submission)
    }

    /// The submitter's most recent submission.
    pub async fn mine(&self, actor: &Actor) -> Result<OnboardingSubmission, OnboardingError> {
        OnboardingSubmission::find_latest_by_profile(&self.db.pool, actor.profile_id)
            .await?
            .ok_or(OnboardingError::NotFound)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        query: &SubmissionQuery,
        pagination: &Pagination,
    ) -> Result<Page<OnboardingSubmissionWithMember>, OnboardingError> {
        let authority = actor.require_staff()?;
        let (rows, total) = OnboardingSubmission::list(
            &self.db.pool,
            &authority,
            query.status,
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
        Ok(Page::new(rows, total, pagination))
    }

    /// Approving validates the member, rejecting rejects it. Both happen in
    /// one transaction with the submission update. A rejected applicant is
    /// unlinked from the member record so they can apply again.
    pub async fn review(
        &self,
        actor: &Actor,
        id: Uuid,
        review: ReviewOnboarding,
    ) -> Result<OnboardingSubmission, OnboardingError> {
        actor.require_staff()?;
        let reason = validate_review(&review)?;
        let submission = OnboardingSubmission::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(OnboardingError::NotFound)?;
        let member = Member::find_by_id(&self.db.pool, submission.member_id)
            .await?
            .ok_or(OnboardingError::NotFound)?;
        if !actor.manages(&member.location()) {
            return Err(OnboardingError::NotFound);
        }

        let mut tx = self.db.pool.begin().await?;
        let reviewed = OnboardingSubmission::review(
            &mut *tx,
            id,
            review.decision,
            actor.profile_id,
            reason,
        )
        .await?
        .ok_or(OnboardingError::AlreadyReviewed)?;
        Member::transition(
            &mut *tx,
            member.id,
            MemberStatus::Pending,
            review.decision.member_status(),
            actor.profile_id,
            reason,
        )
        .await?
        .ok_or(OnboardingError::MemberNotPending)?;
        if review.decision == SubmissionStatus::Rejected {
            Profile::unlink_member(&mut *tx, submission.profile_id, member.id).await?;
        }
        tx.commit().await?;

        info!(
            submission_id = %id,
            member_id = %member.id,
            decision = %review.decision,
            actor_id = %actor.profile_id,
            "Onboarding reviewed"
        );
        Ok(reviewed)
    }
}
