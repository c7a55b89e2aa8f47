use db::{
    DBService,
    models::{
        member::{Member, MemberFilter},
        organisation::{CreateOrganisation, Organisation, OrganisationWithCount, UpdateOrganisation},
    },
    scope::Location,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ts_rs::TS;
use utils::pagination::{Page, Pagination};
use uuid::Uuid;

use super::access::{AccessError, Actor};

#[derive(Debug, Error)]
pub enum OrganisationError {
    #[error("organisation not found")]
    NotFound,
    #[error("organisation still has {0} members; deactivate it instead")]
    HasMembers(i64),
    #[error("invalid organisation: {0}")]
    Validation(String),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct OrganisationQuery {
    pub search: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Clone)]
pub struct OrganisationService {
    db: DBService,
}

impl OrganisationService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Inactive organisations are only listed for staff.
    pub async fn list(
        &self,
        actor: &Actor,
        query: &OrganisationQuery,
        pagination: &Pagination,
    ) -> Result<Page<OrganisationWithCount>, OrganisationError> {
        let include_inactive = query.include_inactive && actor.is_staff();
        let (rows, total) = Organisation::list(
            &self.db.pool,
            query.search.as_deref(),
            include_inactive,
            pagination.limit(),
            pagination.offset(),
        )
        .await?;
        Ok(Page::new(rows, total, pagination))
    }

    pub async fn get(&self, id: Uuid) -> Result<Organisation, OrganisationError> {
        Organisation::find_by_id(&self.db.pool, id)
            .await?
            .ok_or(OrganisationError::NotFound)
    }

    async fn find_managed(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> Result<Organisation, OrganisationError> {
        actor.require_staff()?;
        let organisation = self.get(id).await?;
        if !actor.manages(&organisation.location()) {
            return Err(AccessError::Forbidden("organisation is outside your area").into());
        }
        Ok(organisation)
    }

    pub async fn create(
        &self,
        actor: &Actor,
        data: CreateOrganisation,
    ) -> Result<Organisation, OrganisationError> {
        if data.name.trim().is_empty() {
            return Err(OrganisationError::Validation("name is required".to_string()));
        }
        let requested = Location {
            region_id: data.region_id,
            prefecture_id: data.prefecture_id,
            commune_id: data.commune_id,
        };
        let location = actor.ensure_location(&self.db.pool, &requested).await?;
        let organisation = Organisation::create(&self.db.pool, &data, &location).await?;
        info!(organisation_id = %organisation.id, actor_id = %actor.profile_id, "Organisation created");
        Ok(organisation)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        data: UpdateOrganisation,
    ) -> Result<Organisation, OrganisationError> {
        if data.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(OrganisationError::Validation("name cannot be blank".to_string()));
        }
        self.find_managed(actor, id).await?;
        Organisation::update(&self.db.pool, id, &data)
            .await?
            .ok_or(OrganisationError::NotFound)
    }

    /// Hard delete, refused while members still reference the organisation.
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), OrganisationError> {
        self.find_managed(actor, id).await?;
        let members = Member::count_by_organisation(&self.db.pool, id).await?;
        if members > 0 {
            return Err(OrganisationError::HasMembers(members));
        }
        Organisation::delete(&self.db.pool, id).await?;
        info!(organisation_id = %id, actor_id = %actor.profile_id, "Organisation deleted");
        Ok(())
    }

    /// Members of the organisation that the actor manages.
    pub async fn members(
        &self,
        actor: &Actor,
        id: Uuid,
        pagination: &Pagination,
    ) -> Result<Page<Member>, OrganisationError> {
        let authority = actor.require_staff()?;
        self.get(id).await?;
        let filter = MemberFilter {
            search: None,
            status: None,
            cellule: None,
            organisation_id: Some(id),
            scope: authority,
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
}
