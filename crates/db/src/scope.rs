//! Audience targeting over the region → prefecture → commune tree.
//!
//! Announcements, email campaigns and broadcast conversations all address an
//! audience through the same four-level scope. A scope is stored as a
//! `scope_type` plus the full ancestry of the targeted area, so that SQL can
//! answer both "does this scope reach member X" and "is this scope inside
//! manager Y's authority" with plain equality checks.

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Type};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS, EnumString, Display,
)]
#[sqlx(type_name = "scope_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScopeType {
    All,
    Region,
    Prefecture,
    Commune,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("{0} scope requires a {0}_id")]
    MissingIdentifier(ScopeType),
    #[error("unknown {0}: {1}")]
    UnknownArea(ScopeType, Uuid),
}

/// A resolved audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudienceScope {
    All,
    Region(Uuid),
    Prefecture(Uuid),
    Commune(Uuid),
}

/// Denormalised position of a member, organisation or area in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Location {
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
}

/// Wire form of a scope, as sent by clients and stored in scope columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ScopeTarget {
    pub scope_type: Option<ScopeType>,
    pub region_id: Option<Uuid>,
    pub prefecture_id: Option<Uuid>,
    pub commune_id: Option<Uuid>,
}

impl ScopeTarget {
    pub fn all() -> Self {
        Self {
            scope_type: Some(ScopeType::All),
            ..Default::default()
        }
    }

    /// An explicit `scope_type` selects the level and requires its id; extra
    /// ids are ignored. Without a type the most specific id present wins:
    /// commune, then prefecture, then region, otherwise everyone.
    pub fn resolve(&self) -> Result<AudienceScope, ScopeError> {
        match self.scope_type {
            Some(ScopeType::All) => Ok(AudienceScope::All),
            Some(ScopeType::Region) => self
                .region_id
                .map(AudienceScope::Region)
                .ok_or(ScopeError::MissingIdentifier(ScopeType::Region)),
            Some(ScopeType::Prefecture) => self
                .prefecture_id
                .map(AudienceScope::Prefecture)
                .ok_or(ScopeError::MissingIdentifier(ScopeType::Prefecture)),
            Some(ScopeType::Commune) => self
                .commune_id
                .map(AudienceScope::Commune)
                .ok_or(ScopeError::MissingIdentifier(ScopeType::Commune)),
            None => Ok(if let Some(id) = self.commune_id {
                AudienceScope::Commune(id)
            } else if let Some(id) = self.prefecture_id {
                AudienceScope::Prefecture(id)
            } else if let Some(id) = self.region_id {
                AudienceScope::Region(id)
            } else {
                AudienceScope::All
            }),
        }
    }

    /// Storage form: the scope's level plus the full ancestry of its area.
    pub fn stored(scope: AudienceScope, location: &Location) -> Self {
        match scope {
            AudienceScope::All => Self::all(),
            AudienceScope::Region(id) => Self {
                scope_type: Some(ScopeType::Region),
                region_id: Some(id),
                prefecture_id: None,
                commune_id: None,
            },
            AudienceScope::Prefecture(id) => Self {
                scope_type: Some(ScopeType::Prefecture),
                region_id: location.region_id,
                prefecture_id: Some(id),
                commune_id: None,
            },
            AudienceScope::Commune(id) => Self {
                scope_type: Some(ScopeType::Commune),
                region_id: location.region_id,
                prefecture_id: location.prefecture_id,
                commune_id: Some(id),
            },
        }
    }

    pub fn location(&self) -> Location {
        Location {
            region_id: self.region_id,
            prefecture_id: self.prefecture_id,
            commune_id: self.commune_id,
        }
    }
}

impl AudienceScope {
    pub fn scope_type(&self) -> ScopeType {
        match self {
            AudienceScope::All => ScopeType::All,
            AudienceScope::Region(_) => ScopeType::Region,
            AudienceScope::Prefecture(_) => ScopeType::Prefecture,
            AudienceScope::Commune(_) => ScopeType::Commune,
        }
    }

    pub fn area_id(&self) -> Option<Uuid> {
        match *self {
            AudienceScope::All => None,
            AudienceScope::Region(id)
            | AudienceScope::Prefecture(id)
            | AudienceScope::Commune(id) => Some(id),
        }
    }

    /// Whether a member at `location` is part of this audience.
    pub fn contains(&self, location: &Location) -> bool {
        match *self {
            AudienceScope::All => true,
            AudienceScope::Region(id) => location.region_id == Some(id),
            AudienceScope::Prefecture(id) => location.prefecture_id == Some(id),
            AudienceScope::Commune(id) => location.commune_id == Some(id),
        }
    }

    /// Whether `target`, whose area sits at `target_location`, lies inside
    /// this scope. `All` is only covered by `All`.
    pub fn covers(&self, target: &AudienceScope, target_location: &Location) -> bool {
        match (*self, *target) {
            (AudienceScope::All, _) => true,
            (_, AudienceScope::All) => false,
            (AudienceScope::Region(id), _) => target_location.region_id == Some(id),
            (AudienceScope::Prefecture(_), AudienceScope::Region(_)) => false,
            (AudienceScope::Prefecture(id), _) => target_location.prefecture_id == Some(id),
            (AudienceScope::Commune(id), AudienceScope::Commune(other)) => id == other,
            (AudienceScope::Commune(_), _) => false,
        }
    }

    /// Appends a predicate selecting rows of `alias` located inside this
    /// scope. `alias` must carry `region_id`, `prefecture_id`, `commune_id`.
    pub fn push_location_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, alias: &str) {
        match *self {
            AudienceScope::All => {
                qb.push("TRUE");
            }
            AudienceScope::Region(id) => {
                qb.push(format!("{alias}.region_id = ")).push_bind(id);
            }
            AudienceScope::Prefecture(id) => {
                qb.push(format!("{alias}.prefecture_id = ")).push_bind(id);
            }
            AudienceScope::Commune(id) => {
                qb.push(format!("{alias}.commune_id = ")).push_bind(id);
            }
        }
    }
}

/// Removes duplicates, keeping first-seen order. `All` absorbs everything.
pub fn collapse(scopes: impl IntoIterator<Item = AudienceScope>) -> Vec<AudienceScope> {
    let mut out: Vec<AudienceScope> = Vec::new();
    for scope in scopes {
        if scope == AudienceScope::All {
            return vec![AudienceScope::All];
        }
        if !out.contains(&scope) {
            out.push(scope);
        }
    }
    out
}

/// Appends a predicate matching stored scope rows of `alias` (with
/// `scope_type` and ancestry columns) that reach a member at `location`.
pub fn push_reaches_location(qb: &mut QueryBuilder<'_, Postgres>, alias: &str, location: &Location) {
    qb.push(format!("({alias}.scope_type = 'all'"));
    if let Some(id) = location.region_id {
        qb.push(format!(" OR ({alias}.scope_type = 'region' AND {alias}.region_id = "))
            .push_bind(id)
            .push(")");
    }
    if let Some(id) = location.prefecture_id {
        qb.push(format!(
            " OR ({alias}.scope_type = 'prefecture' AND {alias}.prefecture_id = "
        ))
        .push_bind(id)
        .push(")");
    }
    if let Some(id) = location.commune_id {
        qb.push(format!(" OR ({alias}.scope_type = 'commune' AND {alias}.commune_id = "))
            .push_bind(id)
            .push(")");
    }
    qb.push(")");
}
