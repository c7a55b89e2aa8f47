use db::{
    DBService,
    models::{
        member::{Cellule, CreateMember, Member, MemberFilter, MemberStatus, UpdateMember},
        organisation::Organisation,
        profile::Profile,
    },
    scope::{Location, ScopeTarget, ScopeType},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::{Page, Pagination};
use uuid::Uuid;

use super::access::{AccessError, Actor};

#[derive(Debug, Error)]
pub enum MemberError {
    #[error("member not found")]
    NotFound,
    #[error("cannot move member from {from} to {to}")]
    InvalidTransition { from: MemberStatus, to: MemberStatus },
    #[error("invalid member: {0}")]
    Validation(String),
    #[error("a member with this email already exists")]
    DuplicateEmail,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for MemberError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            MemberError::DuplicateEmail
        } else {
            MemberError::Database(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Query-string filters for the member directory.
#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct MemberQuery {
    pub search: Option<String>,
    pub status: Option<MemberStatus>,
    pub cellule: Option<Cellule>,
    pub organisation_id: Option<Uuid>,
    pub scope_type: Option<ScopeType>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
}

impl MemberQuery {
    fn scope_target(&self) -> Option<ScopeTarget> {
        let target = ScopeTarget {
            scope_type: self.scope_type,
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        };
        (target != ScopeTarget::default()).then_some(target)
    }
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct StatusChange {
    pub reason: Option<String>,
}

fn validate_names(first_name: &str, last_name: &str) -> Result<(), MemberError> {
    if first_name.trim().is_empty() || last_name.trim().is_empty() {
        return Err(MemberError::Validation(
            "first_name and last_name are required".to_string(),
        ));
    }
    Ok(())
}

fn validate_email(email: Option<&str>) -> Result<(), MemberError> {
    match email.map(str::trim) {
        Some(email) if !email.is_empty() && !email.contains('@') => Err(
            MemberError::Validation(format!("invalid email address: {email}")),
        ),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct MemberService {
    db: DBService,
}

impl MemberService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        actor: &Actor,
        query: MemberQuery,
        pagination: &Pagination,
    ) -> Result<Page<Member>, MemberError> {
        let authority = actor.require_staff()?;
        let scope = match query.scope_target() {
            Some(target) => {
                let scope = target.resolve().map_err(AccessError::from)?;
                actor.ensure_covers(&self.db.pool, &scope).await?;
                scope
            }
            None => authority,
        };
        let filter = MemberFilter {
            search: query.search,
            status: query.status,
            cellule: query.cellule,
            organisation_id: query.organisation_id,
            scope,
        };
        let (members, total) = Member::list(
            &self.db.pool,
            &filter,
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
        Ok(Page::new(members, total, pagination))
    }

    /// Staff managing the member's area, or the member themself.
    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Member, MemberError> {
        let member = Member::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(MemberError::NotFound)?;
        if actor.member_id == Some(id) || actor.manages(&member.location()) {
            Ok(member)
        } else {
            Err(MemberError::NotFound)
        }
    }

    async fn find_managed(&self, actor: &Actor, id: Uuid) -> Result<Member, MemberError> {
        actor.require_staff()?;
        let member = Member::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(MemberError::NotFound)?;
        if !actor.manages(&member.location()) {
            return Err(AccessError::Forbidden("member is outside your area").into());
        }
        Ok(member)
    }

    async fn check_organisation(&self, organisation_id: Option<Uuid>) -> Result<(), MemberError> {
        let Some(id) = organisation_id else {
            return Ok(());
        };
        match Organisation::find_by_id(&self.db.pool, id).await? {
            Some(_) => Ok(()),
            None => Err(MemberError::Validation(format!("unknown organisation {id}"))),
        }
    }

    pub async fn create(&self, actor: &Actor, data: CreateMember) -> Result<Member, MemberError> {
        validate_names(&data.first_name, &data.last_name)?;
        validate_email(data.email.as_deref())?;
        let requested = Location {
            region_id: data.region_id,
            prefecture_id: data.prefecture_id,
            commune_id: data.commune_id,
        };
        let location = actor.ensure_location(&self.db.pool, &requested).await?;
        self.check_organisation(data.organisation_id).await?;

        let member = Member::create(&self.db.pool, &data, &location).await?;
        info!(member_id = %member.id, actor_id = %actor.profile_id, "Member created");
        Ok(member)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        data: UpdateMember,
    ) -> Result<Member, MemberError> {
        let existing = self.find_managed(actor, id).await?;
        if let (Some(first), Some(last)) = (data.first_name.as_deref(), data.last_name.as_deref())
        {
            validate_names(first, last)?;
        } else if data.first_name.as_deref().is_some_and(|s| s.trim().is_empty())
            || data.last_name.as_deref().is_some_and(|s| s.trim().is_empty())
        {
            return Err(MemberError::Validation("names cannot be blank".to_string()));
        }
        validate_email(data.email.as_deref())?;
        self.check_organisation(data.organisation_id).await?;

        let location = if data.touches_location() {
            let requested = Location {
                region_id: data.region_id,
                prefecture_id: data.prefecture_id,
                commune_id: data.commune_id,
            };
            Some(actor.ensure_location(&self.db.pool, &requested).await?)
        } else {
            None
        };

        let Some(location) = location else {
            return Member::update(&self.db.pool, existing.id, &data, None)
                .await?
                .ok_or(MemberError::NotFound);
        };
        let mut tx = self.db.pool.begin().await?;
        let member = Member::update(&mut *tx, existing.id, &data, Some(&location))
            .await?
            .ok_or(MemberError::NotFound)?;
        Profile::sync_member_location(&mut *tx, member.id, &location).await?;
        tx.commit().await?;
        info!(member_id = %member.id, actor_id = %actor.profile_id, "Member relocated");
        Ok(member)
    }

    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), MemberError> {
        let member = self.find_managed(actor, id).await?;
        Member::delete(&self.db.pool, member.id).await?;
        info!(member_id = %id, actor_id = %actor.profile_id, "Member deleted");
        Ok(())
    }

    pub async fn validate(&self, actor: &Actor, id: Uuid) -> Result<Member, MemberError> {
        self.change_status(actor, id, MemberStatus::Pending, MemberStatus::Validated, None)
            .await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Member, MemberError> {
        let reason = reason.filter(|r| !r.trim().is_empty()).ok_or_else(|| {
            MemberError::Validation("a rejection reason is required".to_string())
        })?;
        self.change_status(
            actor,
            id,
            MemberStatus::Pending,
            MemberStatus::Rejected,
            Some(reason.trim()),
        )
        .await
    }

    pub async fn suspend(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Member, MemberError> {
        self.change_status(
            actor,
            id,
            MemberStatus::Validated,
            MemberStatus::Suspended,
            reason.as_deref(),
        )
        .await
    }

    pub async fn reinstate(&self, actor: &Actor, id: Uuid) -> Result<Member, MemberError> {
        self.change_status(actor, id, MemberStatus::Suspended, MemberStatus::Validated, None)
            .await
    }

    /// Each action starts from exactly one status, so validating a suspended
    /// member or reinstating a pending one is refused.
    async fn change_status(
        &self,
        actor: &Actor,
        id: Uuid,
        expected: MemberStatus,
        to: MemberStatus,
        reason: Option<&str>,
    ) -> Result<Member, MemberError> {
        let member = self.find_managed(actor, id).await?;
        let from = member.status;
        if from != expected || !from.can_transition_to(to) {
            return Err(MemberError::InvalidTransition { from, to });
        }
        let updated = Member::transition(&self.db.pool, id, from, to, actor.profile_id, reason)
            .await?
            .ok_or(MemberError::InvalidTransition { from, to })?;
        info!(
            member_id = %id,
            from = %from,
            to = %to,
            actor_id = %actor.profile_id,
            membership_number = ?updated.membership_number,
            "Member status changed"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_has_no_scope() {
        assert!(MemberQuery::default().scope_target().is_none());
    }

    #[test]
    fn query_scope_keeps_ids() {
        let region = Uuid::new_v4();
        let query = MemberQuery {
            region_id: Some(region),
            ..Default::default()
        };
        let target = query.scope_target().unwrap();
        assert_eq!(target.region_id, Some(region));
        assert_eq!(target.scope_type, None);
    }

    #[test]
    fn names_are_required() {
        assert!(validate_names("Awa", "Keita").is_ok());
        assert!(matches!(
            validate_names("  ", "Keita"),
            Err(MemberError::Validation(_))
        ));
    }

    #[test]
    fn email_needs_an_at_sign() {
        assert!(validate_email(None).is_ok());
        assert!(validate_email(Some("")).is_ok());
        assert!(validate_email(Some("awa@example.org")).is_ok());
        assert!(validate_email(Some("awa.example.org")).is_err());
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn relocation_moves_the_linked_profile(pool: sqlx::PgPool) {
        let mut regions = Vec::new();
        for name in ["Boké", "Mamou"] {
            let id = sqlx::query_scalar::<_, Uuid>(
                "INSERT INTO regions (name) VALUES ($1) RETURNING id",
            )
            .bind(name)
            .fetch_one(&pool)
            .await
            .unwrap();
            regions.push(id);
        }
        let member_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO members (first_name, last_name, region_id, status)
             VALUES ('Moussa', 'Camara', $1, 'validated') RETURNING id",
        )
        .bind(regions[0])
        .fetch_one(&pool)
        .await
        .unwrap();
        let profile_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO profiles (id, role, member_id, region_id) VALUES ($1, 'member', $2, $3)",
        )
        .bind(profile_id)
        .bind(member_id)
        .bind(regions[0])
        .execute(&pool)
        .await
        .unwrap();

        let admin = Actor {
            profile_id: Uuid::new_v4(),
            email: None,
            role: db::models::profile::UserRole::Admin,
            member_id: None,
            location: Location::default(),
        };
        let members = MemberService::new(DBService { pool: pool.clone() });
        let moved = members
            .update(
                &admin,
                member_id,
                UpdateMember {
                    region_id: Some(regions[1]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.region_id, Some(regions[1]));

        let profile = Profile::find_by_id(&pool, profile_id).await.unwrap().unwrap();
        assert_eq!(profile.region_id, Some(regions[1]));
    }
}
