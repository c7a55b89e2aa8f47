use db::{
    DBService,
    models::dashboard::{Dashboard, DashboardSummary},
};
use thiserror::Error;

use super::access::{AccessError, Actor};

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct DashboardService {
    db: DBService,
}

impl DashboardService {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Counts restricted to the actor's authority.
    pub async fn summary(&self, actor: &Actor) -> Result<DashboardSummary, DashboardError> {
        let authority = actor.require_staff()?;
        Ok(Dashboard::summary(&self.db.pool, &authority).await?)
    }
}
