//! Who is acting, and which part of the geography tree they may manage.

use db::{
    models::{
        geography::{Geography, GeographyError},
        member::Member,
        profile::{Profile, UpdateProfileRole, UserRole},
    },
    scope::{AudienceScope, Location, ScopeError},
};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("profile not found")]
    ProfileNotFound,
    #[error("{0} requires its area id")]
    MissingArea(UserRole),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl From<GeographyError> for AccessError {
    fn from(err: GeographyError) -> Self {
        match err {
            GeographyError::Database(e) => AccessError::Database(e),
            GeographyError::Scope(e) => AccessError::Scope(e),
        }
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Serialize, TS)]
pub struct Actor {
    pub profile_id: Uuid,
    pub email: Option<String>,
    pub role: UserRole,
    pub member_id: Option<Uuid>,
    pub location: Location,
}

impl From<&Profile> for Actor {
    fn from(profile: &Profile) -> Self {
        Actor {
            profile_id: profile.id,
            email: profile.email.clone(),
            role: profile.role,
            member_id: profile.member_id,
            location: profile.location(),
        }
    }
}

impl Actor {
    pub fn is_staff(&self) -> bool {
        self.role != UserRole::Member
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == UserRole::SuperAdmin
    }

    /// Management scope. `None` for plain members and for managers whose
    /// geography is not set.
    pub fn authority(&self) -> Option<AudienceScope> {
        match self.role {
            UserRole::SuperAdmin | UserRole::Admin => Some(AudienceScope::All),
            UserRole::RegionalManager => self.location.region_id.map(AudienceScope::Region),
            UserRole::PrefectureManager => {
                self.location.prefecture_id.map(AudienceScope::Prefecture)
            }
            UserRole::CommuneManager => self.location.commune_id.map(AudienceScope::Commune),
            UserRole::Member => None,
        }
    }

    pub fn require_staff(&self) -> Result<AudienceScope, AccessError> {
        if !self.is_staff() {
            return Err(AccessError::Forbidden("staff role required"));
        }
        self.authority()
            .ok_or(AccessError::Forbidden("manager role has no assigned area"))
    }

    /// Checks that `target` lies inside the actor's authority and returns
    /// the target's ancestry for storage.
    pub async fn ensure_covers(
        &self,
        pool: &PgPool,
        target: &AudienceScope,
    ) -> Result<Location, AccessError> {
        let authority = self.require_staff()?;
        let location = Geography::locate(pool, target).await?;
        if !authority.covers(target, &location) {
            return Err(AccessError::Forbidden("target is outside your area"));
        }
        Ok(location)
    }

    /// Normalises `location` and checks that it lies inside the actor's
    /// authority.
    pub async fn ensure_location(
        &self,
        pool: &PgPool,
        location: &Location,
    ) -> Result<Location, AccessError> {
        let authority = self.require_staff()?;
        let location = Geography::normalise(pool, location).await?;
        if !authority.contains(&location) {
            return Err(AccessError::Forbidden("location is outside your area"));
        }
        Ok(location)
    }

    /// Whether the actor manages records located at `location`.
    pub fn manages(&self, location: &Location) -> bool {
        self.is_staff()
            && self
                .authority()
                .is_some_and(|authority| authority.contains(location))
    }
}

/// Area id a role is bound to, taken from the request.
fn role_area(data: &UpdateProfileRole) -> Result<Option<AudienceScope>, AccessError> {
    let area = match data.role {
        UserRole::RegionalManager => data.region_id.map(AudienceScope::Region),
        UserRole::PrefectureManager => data.prefecture_id.map(AudienceScope::Prefecture),
        UserRole::CommuneManager => data.commune_id.map(AudienceScope::Commune),
        UserRole::SuperAdmin | UserRole::Admin | UserRole::Member => return Ok(None),
    };
    area.map(Some).ok_or(AccessError::MissingArea(data.role))
}

async fn member_location(pool: &PgPool, profile: &Profile) -> Result<Location, AccessError> {
    let Some(member_id) = profile.member_id else {
        return Ok(Location::default());
    };
    Ok(Member::find_by_id(pool, member_id)
        .await?
        .map(|member| member.location())
        .unwrap_or_default())
}

/// Changes a profile's role. Only super admins may do this. Manager roles
/// take the geography of their area, plain members that of their member
/// record, and admins keep the profile's own.
pub async fn assign_role(
    pool: &PgPool,
    actor: &Actor,
    profile_id: Uuid,
    data: &UpdateProfileRole,
) -> Result<Profile, AccessError> {
    if !actor.is_super_admin() {
        return Err(AccessError::Forbidden("only a super admin can assign roles"));
    }
    let profile = Profile::find_by_id(pool, profile_id)
        .await?
        .ok_or(AccessError::ProfileNotFound)?;
    let location = match role_area(data)? {
        Some(area) => Geography::locate(pool, &area).await?,
        None if data.role == UserRole::Member => member_location(pool, &profile).await?,
        None => profile.location(),
    };
    Profile::update_role(pool, profile_id, data, &location)
        .await?
        .ok_or(AccessError::ProfileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: UserRole, location: Location) -> Actor {
        Actor {
            profile_id: Uuid::new_v4(),
            email: None,
            role,
            member_id: None,
            location,
        }
    }

    #[test]
    fn manager_roles_need_their_area() {
        let region = Uuid::new_v4();
        let data = UpdateProfileRole {
            role: UserRole::RegionalManager,
            region_id: Some(region),
            prefecture_id: None,
            commune_id: None,
        };
        assert_eq!(role_area(&data).unwrap(), Some(AudienceScope::Region(region)));

        let missing = UpdateProfileRole {
            role: UserRole::CommuneManager,
            ..data.clone()
        };
        assert!(matches!(
            role_area(&missing),
            Err(AccessError::MissingArea(UserRole::CommuneManager))
        ));

        let admin = UpdateProfileRole {
            role: UserRole::Admin,
            ..data
        };
        assert_eq!(role_area(&admin).unwrap(), None);
    }

    #[test]
    fn admins_have_full_authority() {
        for role in [UserRole::SuperAdmin, UserRole::Admin] {
            assert_eq!(
                actor(role, Location::default()).authority(),
                Some(AudienceScope::All)
            );
        }
    }

    #[test]
    fn managers_are_bound_to_their_area() {
        let region = Uuid::new_v4();
        let prefecture = Uuid::new_v4();
        let location = Location {
            region_id: Some(region),
            prefecture_id: Some(prefecture),
            commune_id: None,
        };
        assert_eq!(
            actor(UserRole::RegionalManager, location).authority(),
            Some(AudienceScope::Region(region))
        );
        assert_eq!(
            actor(UserRole::PrefectureManager, location).authority(),
            Some(AudienceScope::Prefecture(prefecture))
        );
        assert_eq!(actor(UserRole::CommuneManager, location).authority(), None);
    }

    #[test]
    fn members_cannot_manage() {
        let location = Location {
            region_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let member = actor(UserRole::Member, location);
        assert!(!member.is_staff());
        assert!(member.require_staff().is_err());
        assert!(!member.manages(&location));
    }

    #[test]
    fn manager_without_area_is_forbidden() {
        let manager = actor(UserRole::RegionalManager, Location::default());
        assert!(matches!(
            manager.require_staff(),
            Err(AccessError::Forbidden(_))
        ));
    }

    #[test]
    fn manages_checks_location() {
        let region = Uuid::new_v4();
        let manager = actor(
            UserRole::RegionalManager,
            Location {
                region_id: Some(region),
                ..Default::default()
            },
        );
        let inside = Location {
            region_id: Some(region),
            prefecture_id: Some(Uuid::new_v4()),
            commune_id: None,
        };
        let outside = Location {
            region_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(manager.manages(&inside));
        assert!(!manager.manages(&outside));
    }

    async fn region(pool: &PgPool, name: &str) -> Uuid {
        sqlx::query_scalar::<_, Uuid>("INSERT INTO regions (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn manager_profile(pool: &PgPool, region_id: Uuid, member_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO profiles (id, role, region_id, member_id)
             VALUES ($1, 'regional_manager', $2, $3)",
        )
        .bind(id)
        .bind(region_id)
        .bind(member_id)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    fn demote() -> UpdateProfileRole {
        UpdateProfileRole {
            role: UserRole::Member,
            region_id: None,
            prefecture_id: None,
            commune_id: None,
        }
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn demoted_manager_takes_member_geography(pool: PgPool) {
        let home = region(&pool, "Labé").await;
        let managed = region(&pool, "Kankan").await;
        let member_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO members (first_name, last_name, region_id)
             VALUES ('Awa', 'Keita', $1) RETURNING id",
        )
        .bind(home)
        .fetch_one(&pool)
        .await
        .unwrap();
        let profile_id = manager_profile(&pool, managed, Some(member_id)).await;
        let admin = actor(UserRole::SuperAdmin, Location::default());

        let demoted = assign_role(&pool, &admin, profile_id, &demote()).await.unwrap();
        assert_eq!(demoted.role, UserRole::Member);
        assert_eq!(demoted.region_id, Some(home));
    }

    #[sqlx::test(migrations = "../db/migrations")]
    async fn demoted_manager_without_member_loses_area(pool: PgPool) {
        let managed = region(&pool, "Kankan").await;
        let profile_id = manager_profile(&pool, managed, None).await;
        let admin = actor(UserRole::SuperAdmin, Location::default());

        let demoted = assign_role(&pool, &admin, profile_id, &demote()).await.unwrap();
        assert_eq!(demoted.location(), Location::default());
    }
}
