use chrono::{DateTime, Utc};
use tracing::debug;

use super::queries;
use super::DbPool;
use crate::directory::DirectorySource;
use crate::models::{ActiveConductorView, Conductor, ConductorStatus};
use crate::publisher::{ActiveConductorStore, ActiveRowFilter, PositionUpdate};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Conductor roster, loaded once at startup.
    pub async fn list_conductors(&self) -> anyhow::Result<Vec<Conductor>> {
        let conductors = sqlx::query_as::<_, Conductor>(queries::SELECT_CONDUCTORS)
            .fetch_all(&self.pool)
            .await?;
        Ok(conductors)
    }
}

impl ActiveConductorStore for PgStore {
    async fn update_position_if_active(
        &self,
        filter: &ActiveRowFilter,
        update: &PositionUpdate,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(queries::UPDATE_POSITION_IF_ACTIVE)
            .bind(filter.conductor_id)
            .bind(update.latitude)
            .bind(update.longitude)
            .bind(update.accuracy)
            .bind(update.updated_at)
            .execute(&self.pool)
            .await?;
        debug!(
            "Position update for {} affected {} rows",
            filter.conductor_id,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    async fn update_status_if_active(
        &self,
        filter: &ActiveRowFilter,
        is_available: bool,
        status: ConductorStatus,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(queries::UPDATE_STATUS_IF_ACTIVE)
            .bind(filter.conductor_id)
            .bind(is_available)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn touch_ping_if_active(
        &self,
        filter: &ActiveRowFilter,
        at: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(queries::TOUCH_PING_IF_ACTIVE)
            .bind(filter.conductor_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

impl DirectorySource for PgStore {
    async fn fetch_active(&self) -> anyhow::Result<Vec<ActiveConductorView>> {
        let rows = sqlx::query_as::<_, ActiveConductorView>(queries::SELECT_ACTIVE_DIRECTORY)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
