use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Executor, FromRow, PgPool, Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::member::{CreateMember, MemberStatus};
use crate::scope::AudienceScope;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "submission_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubmissionStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    /// Member status a review decision leads to.
    pub fn member_status(self) -> MemberStatus {
        match self {
            SubmissionStatus::Pending => MemberStatus::Pending,
            SubmissionStatus::Approved => MemberStatus::Validated,
            SubmissionStatus::Rejected => MemberStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct OnboardingSubmission {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub member_id: Uuid,
    pub answers: Value,
    pub status: SubmissionStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Submission row joined with the applicant's member record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct OnboardingSubmissionWithMember {
    #[serde(flatten)]
    #[ts(flatten)]
    #[sqlx(flatten)]
    pub submission: OnboardingSubmission,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SubmitOnboarding {
    pub member: CreateMember,
    #[serde(default)]
    pub answers: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ReviewOnboarding {
    pub decision: SubmissionStatus,
    pub reason: Option<String>,
}

const SUBMISSION_COLUMNS: &str = "o.id, o.profile_id, o.member_id, o.answers, o.status, \
     o.reviewed_by, o.reviewed_at, o.rejection_reason, o.created_at, o.updated_at";

impl OnboardingSubmission {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OnboardingSubmission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions o WHERE o.id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_pending_by_profile(
        pool: &PgPool,
        profile_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OnboardingSubmission>(&format!(
            r#"SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions o
               WHERE o.profile_id = $1 AND o.status = 'pending'"#
        ))
        .bind(profile_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_latest_by_profile(
        pool: &PgPool,
        profile_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, OnboardingSubmission>(&format!(
            r#"SELECT {SUBMISSION_COLUMNS} FROM onboarding_submissions o
               WHERE o.profile_id = $1
               ORDER BY o.created_at DESC
               LIMIT 1"#
        ))
        .bind(profile_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        profile_id: Uuid,
        member_id: Uuid,
        answers: &Value,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, OnboardingSubmission>(&format!(
            r#"INSERT INTO onboarding_submissions AS o (profile_id, member_id, answers)
               VALUES ($1, $2, $3)
               RETURNING {SUBMISSION_COLUMNS}"#
        ))
        .bind(profile_id)
        .bind(member_id)
        .bind(answers)
        .fetch_one(executor)
        .await
    }

    /// Submissions whose applicant lives inside `authority`, newest first.
    pub async fn list(
        pool: &PgPool,
        authority: &AudienceScope,
        status: Option<SubmissionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<OnboardingSubmissionWithMember>, i64), sqlx::Error> {
        fn push_filters(
            qb: &mut QueryBuilder<'_, Postgres>,
            authority: &AudienceScope,
            status: Option<SubmissionStatus>,
        ) {
            qb.push(" WHERE ");
            authority.push_location_filter(qb, "m");
            if let Some(status) = status {
                qb.push(" AND o.status = ").push_bind(status);
            }
        }

        let mut count_qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM onboarding_submissions o JOIN members m ON m.id = o.member_id",
        );
        push_filters(&mut count_qb, authority, status);
        let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"SELECT {SUBMISSION_COLUMNS}, m.first_name, m.last_name, m.email, m.phone
               FROM onboarding_submissions o
               JOIN members m ON m.id = o.member_id"#
        ));
        push_filters(&mut qb, authority, status);
        qb.push(" ORDER BY o.created_at DESC, o.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb
            .build_query_as::<OnboardingSubmissionWithMember>()
            .fetch_all(pool)
            .await?;

        Ok((rows, total))
    }

    /// Records a decision on a pending submission. Returns `None` when the
    /// submission is missing or already reviewed.
    pub async fn review<'e, E>(
        executor: E,
        id: Uuid,
        decision: SubmissionStatus,
        reviewer_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, OnboardingSubmission>(&format!(
            r#"UPDATE onboarding_submissions AS o SET
                   status = $2,
                   reviewed_by = $3,
                   reviewed_at = NOW(),
                   rejection_reason = $4,
                   updated_at = NOW()
               WHERE o.id = $1 AND o.status = 'pending'
               RETURNING {SUBMISSION_COLUMNS}"#
        ))
        .bind(id)
        .bind(decision)
        .bind(reviewer_id)
        .bind(reason)
        .fetch_optional(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decisions_map_to_member_status() {
        assert_eq!(
            SubmissionStatus::Approved.member_status(),
            MemberStatus::Validated
        );
        assert_eq!(
            SubmissionStatus::Rejected.member_status(),
            MemberStatus::Rejected
        );
    }

    #[test]
    fn review_payload_parses() {
        let review: ReviewOnboarding =
            serde_json::from_str(r#"{"decision":"rejected","reason":"incomplete"}"#).unwrap();
        assert_eq!(review.decision, SubmissionStatus::Rejected);
        assert_eq!(review.reason.as_deref(), Some("incomplete"));
    }
}
