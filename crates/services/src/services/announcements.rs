use db::{
    DBService,
    models::announcement::{
        Announcement, AnnouncementStatus, AnnouncementWithScopes, CreateAnnouncement,
        LocatedScope, UpdateAnnouncement,
    },
    scope::{self, AudienceScope, ScopeTarget},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::Pagination;
use uuid::Uuid;

use super::access::{AccessError, Actor};

#[derive(Debug, Error)]
pub enum AnnouncementError {
    #[error("announcement not found")]
    NotFound,
    #[error("cannot move announcement from {from} to {to}")]
    InvalidTransition {
        from: AnnouncementStatus,
        to: AnnouncementStatus,
    },
    #[error("archived announcements cannot be edited")]
    Archived,
    #[error("invalid announcement: {0}")]
    Validation(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct AnnouncementQuery {
    pub status: Option<AnnouncementStatus>,
}

fn can_transition(from: AnnouncementStatus, to: AnnouncementStatus) -> bool {
    matches!(
        (from, to),
        (AnnouncementStatus::Draft, AnnouncementStatus::Published)
            | (AnnouncementStatus::Draft, AnnouncementStatus::Archived)
            | (AnnouncementStatus::Published, AnnouncementStatus::Archived)
    )
}

/// Whether every stored scope lies inside `authority`.
fn covers_all(authority: &AudienceScope, scopes: &[ScopeTarget]) -> bool {
    scopes.iter().all(|target| {
        target
            .resolve()
            .is_ok_and(|scope| authority.covers(&scope, &target.location()))
    })
}

#[derive(Clone)]
pub struct AnnouncementService {
    db: DBService,
}

impl AnnouncementService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Resolves, de-duplicates and authorises the requested audience.
    /// An empty list means everyone.
    async fn locate_scopes(
        &self,
        actor: &Actor,
        targets: &[ScopeTarget],
    ) -> Result<Vec<LocatedScope>, AnnouncementError> {
        let resolved = if targets.is_empty() {
            vec![AudienceScope::All]
        } else {
            targets
                .iter()
                .map(ScopeTarget::resolve)
                .collect::<Result<Vec<_>, _>>()
                .map_err(AccessError::from)?
        };

        let mut located = Vec::new();
        for scope in scope::collapse(resolved) {
            let location = actor.ensure_covers(&self.db.pool, &scope).await?;
            located.push((scope, location));
        }
        Ok(located)
    }

    async fn find_managed(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<AnnouncementWithScopes, AnnouncementError> {
        let authority = actor.require_staff()?;
        let announcement = Announcement::find_with_scopes(&self.db.pool, id)
            .await?
            .ok_or(AnnouncementError::NotFound)?;
        if !covers_all(&authority, &announcement.scopes) {
            return Err(AccessError::Forbidden("announcement targets outside your area").into());
        }
        Ok(announcement)
    }

    pub async fn create(
        &self,
        actor: &Actor,
        data: CreateAnnouncement,
    ) -> Result<AnnouncementWithScopes, AnnouncementError> {
        if data.title.trim().is_empty() || data.body.trim().is_empty() {
            return Err(AnnouncementError::Validation(
                "title and body are required".to_string(),
            ));
        }
        let scopes = self.locate_scopes(actor, &data.scopes).await?;
        let announcement =
            Announcement::create(&self.db.pool, actor.profile_id, &data, &scopes).await?;
        info!(
            announcement_id = %announcement.id,
            scopes = scopes.len(),
            actor_id = %actor.profile_id,
            "Announcement created"
        );
        Ok(announcement)
    }

    pub async fn get(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<AnnouncementWithScopes, AnnouncementError> {
        let announcement = Announcement::find_with_scopes(&self.db.pool, id)
            .await?
            .ok_or(AnnouncementError::NotFound)?;
        let managed = actor.is_staff()
            && actor
                .authority()
                .is_some_and(|authority| covers_all(&authority, &announcement.scopes));
        if managed {
            return Ok(announcement);
        }
        let visible = announcement.status == AnnouncementStatus::Published
            && announcement.scopes.iter().any(|target| {
                target
                    .resolve()
                    .is_ok_and(|scope| scope.contains(&actor.location))
            });
        if visible {
            Ok(announcement)
        } else {
            Err(AnnouncementError::NotFound)
        }
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        data: UpdateAnnouncement,
    ) -> Result<AnnouncementWithScopes, AnnouncementError> {
        let existing = self.find_managed(actor, id).await?;
        if existing.status == AnnouncementStatus::Archived {
            return Err(AnnouncementError::Archived);
        }
        if data.title.as_deref().is_some_and(|t| t.trim().is_empty())
            || data.body.as_deref().is_some_and(|b| b.trim().is_empty())
        {
            return Err(AnnouncementError::Validation(
                "title and body cannot be blank".to_string(),
            ));
        }
        let scopes = match data.scopes.as_deref() {
            Some(targets) => Some(self.locate_scopes(actor, targets).await?),
            None => None,
        };
        Announcement::update(&self.db.pool, id, &data, scopes.as_deref())
            .await?
            .ok_or(AnnouncementError::NotFound)
    }

    pub async fn publish(&self, actor: &Actor, id: Uuid) -> Result<Announcement, AnnouncementError> {
        self.set_status(actor, id, AnnouncementStatus::Published)
            .await
    }

    pub async fn archive(&self, actor: &Actor, id: Uuid) -> Result<Announcement, AnnouncementError> {
        self.set_status(actor, id, AnnouncementStatus::Archived)
            .await
    }

    async fn set_status(
        &self,
        actor: &Actor,
        id: Uuid,
        to: AnnouncementStatus,
    ) -> Result<Announcement, AnnouncementError> {
        let existing = self.find_managed(actor, id).await?;
        let from = existing.status;
        if !can_transition(from, to) {
            return Err(AnnouncementError::InvalidTransition { from, to });
        }
        let updated = Announcement::set_status(&self.db.pool, id, to)
            .await?
            .ok_or(AnnouncementError::NotFound)?;
        info!(announcement_id = %id, status = %to, actor_id = %actor.profile_id, "Announcement status changed");
        Ok(updated)
    }

    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), AnnouncementError> {
        self.find_managed(actor, id).await?;
        Announcement::delete(&self.db.pool, id).await?;
        info!(announcement_id = %id, actor_id = %actor.profile_id, "Announcement deleted");
        Ok(())
    }

    /// Published announcements reaching the actor.
    pub async fn feed(
        &self,
        actor: &Actor,
        pagination: &Pagination,
    ) -> Result<Vec<AnnouncementWithScopes>, AnnouncementError> {
        Ok(Announcement::feed(
            &self.db.pool,
            &actor.location,
            pagination.limit(),
            pagination.offset(),
        )
        .await?)
    }

    /// Everything inside the actor's authority, any status.
    pub async fn list_managed(
        &self,
        actor: &Actor,
        query: &AnnouncementQuery,
        pagination: &Pagination,
    ) -> Result<Vec<AnnouncementWithScopes>, AnnouncementError> {
        let authority = actor.require_staff()?;
        Ok(Announcement::list_managed(
            &self.db.pool,
            &authority,
            query.status,
            pagination.limit(),
            pagination.offset(),
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use db::scope::{Location, ScopeType};

    use super::*;

    #[test]
    fn announcement_transitions() {
        use AnnouncementStatus::*;
        assert!(can_transition(Draft, Published));
        assert!(can_transition(Published, Archived));
        assert!(can_transition(Draft, Archived));
        assert!(!can_transition(Archived, Published));
        assert!(!can_transition(Published, Draft));
    }

    #[test]
    fn regional_authority_covers_only_its_region() {
        let region = Uuid::new_v4();
        let prefecture = Uuid::new_v4();
        let inside = ScopeTarget::stored(
            AudienceScope::Prefecture(prefecture),
            &Location {
                region_id: Some(region),
                prefecture_id: Some(prefecture),
                commune_id: None,
            },
        );
        let authority = AudienceScope::Region(region);

        assert!(covers_all(&authority, &[inside]));
        assert!(!covers_all(&authority, &[inside, ScopeTarget::all()]));
        assert!(covers_all(&AudienceScope::All, &[inside, ScopeTarget::all()]));
    }

    #[test]
    fn malformed_stored_scope_is_not_covered() {
        let broken = ScopeTarget {
            scope_type: Some(ScopeType::Commune),
            ..Default::default()
        };
        assert!(!covers_all(&AudienceScope::All, &[broken]));
    }
}
