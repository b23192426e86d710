use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::queries;
use crate::models::{ActiveConductor, ConductorId, ConductorStatus, PositionSample};

/// The conditional-write predicate shared by every publisher write:
/// the row must belong to the conductor and still be flagged active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRowFilter {
    pub conductor_id: ConductorId,
}

impl ActiveRowFilter {
    pub const SQL: &'static str = queries::ACTIVE_ROW_PREDICATE;

    pub fn for_conductor(conductor_id: ConductorId) -> Self {
        Self { conductor_id }
    }

    pub fn matches(&self, row: &ActiveConductor) -> bool {
        row.conductor_id == self.conductor_id && row.is_active
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Conditional writes against `active_conductors`. Each method returns the
/// number of rows affected.
pub trait ActiveConductorStore: Send + Sync + 'static {
    fn update_position_if_active(
        &self,
        filter: &ActiveRowFilter,
        update: &PositionUpdate,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn update_status_if_active(
        &self,
        filter: &ActiveRowFilter,
        is_available: bool,
        status: ConductorStatus,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn touch_ping_if_active(
        &self,
        filter: &ActiveRowFilter,
        at: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("write rejected by backend: {0}")]
    Rejected(#[source] anyhow::Error),
    #[error("conductor {0} is not active, write skipped")]
    SkippedInactive(ConductorId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PublishOutcome {
    Written { updated_at: DateTime<Utc> },
}

pub struct LocationPublisher<S: ActiveConductorStore> {
    store: Arc<S>,
}

impl<S: ActiveConductorStore> Clone for LocationPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ActiveConductorStore> LocationPublisher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persists the sample as the conductor's current position, stamped
    /// with the current time. Not retried; the next accepted sample is.
    pub async fn publish(
        &self,
        conductor_id: ConductorId,
        sample: &PositionSample,
    ) -> Result<PublishOutcome, PublishError> {
        let filter = ActiveRowFilter::for_conductor(conductor_id);
        let update = PositionUpdate {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            updated_at: Utc::now(),
        };

        let rows = self
            .store
            .update_position_if_active(&filter, &update)
            .await
            .map_err(|e| {
                warn!("Position write for {} failed: {}", conductor_id, e);
                PublishError::Rejected(e)
            })?;

        if rows == 0 {
            debug!("Position write for inactive conductor {} skipped", conductor_id);
            return Err(PublishError::SkippedInactive(conductor_id));
        }

        Ok(PublishOutcome::Written {
            updated_at: update.updated_at,
        })
    }

    pub async fn set_status(
        &self,
        conductor_id: ConductorId,
        is_available: bool,
        status: ConductorStatus,
    ) -> Result<(), PublishError> {
        let filter = ActiveRowFilter::for_conductor(conductor_id);
        let rows = self
            .store
            .update_status_if_active(&filter, is_available, status)
            .await
            .map_err(PublishError::Rejected)?;

        if rows == 0 {
            return Err(PublishError::SkippedInactive(conductor_id));
        }
        Ok(())
    }

    /// Heartbeat: refreshes `last_ping` without touching position fields.
    pub async fn ping(&self, conductor_id: ConductorId) -> Result<(), PublishError> {
        let filter = ActiveRowFilter::for_conductor(conductor_id);
        let rows = self
            .store
            .touch_ping_if_active(&filter, Utc::now())
            .await
            .map_err(PublishError::Rejected)?;

        if rows == 0 {
            return Err(PublishError::SkippedInactive(conductor_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::models::Conductor;
    use uuid::Uuid;

    fn backend_with(id: Uuid, active: bool) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_conductor(Conductor {
            id,
            name: "Joana".to_string(),
            whatsapp: Some("+351900000000".to_string()),
            is_active: true,
        });
        backend.set_active(id, active);
        backend
    }

    #[test]
    fn test_filter_sql_is_the_shared_predicate() {
        assert_eq!(
            ActiveRowFilter::SQL,
            "conductor_id = $1 AND is_active = true"
        );
        assert!(queries::UPDATE_POSITION_IF_ACTIVE.contains(ActiveRowFilter::SQL));
        assert!(queries::UPDATE_STATUS_IF_ACTIVE.contains(ActiveRowFilter::SQL));
        assert!(queries::TOUCH_PING_IF_ACTIVE.contains(ActiveRowFilter::SQL));
    }

    #[tokio::test]
    async fn test_publish_active_conductor() {
        let id = Uuid::new_v4();
        let backend = backend_with(id, true);
        let publisher = LocationPublisher::new(backend.clone());

        let sample = PositionSample::new(37.7251, -8.7831, Utc::now()).with_accuracy(5.0);
        let outcome = publisher.publish(id, &sample).await.unwrap();

        let row = backend.row(id).unwrap();
        let PublishOutcome::Written { updated_at } = outcome;
        assert_eq!(row.latitude, Some(37.7251));
        assert_eq!(row.longitude, Some(-8.7831));
        assert_eq!(row.accuracy, Some(5.0));
        assert_eq!(row.updated_at, Some(updated_at));
    }

    #[tokio::test]
    async fn test_publish_inactive_conductor_is_skipped() {
        let id = Uuid::new_v4();
        let backend = backend_with(id, false);
        let before = backend.row(id).unwrap();
        let publisher = LocationPublisher::new(backend.clone());

        let sample = PositionSample::new(37.7251, -8.7831, Utc::now());
        let err = publisher.publish(id, &sample).await.unwrap_err();
        assert!(matches!(err, PublishError::SkippedInactive(c) if c == id));

        assert_eq!(backend.row(id).unwrap(), before);
        let writes = backend.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].filter, ActiveRowFilter::for_conductor(id));
        assert_eq!(writes[0].rows_affected, 0);
    }

    #[tokio::test]
    async fn test_publish_unknown_conductor_creates_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let publisher = LocationPublisher::new(backend.clone());
        let id = Uuid::new_v4();

        let sample = PositionSample::new(37.7251, -8.7831, Utc::now());
        assert!(publisher.publish(id, &sample).await.is_err());
        assert!(backend.row(id).is_none());
    }

    #[tokio::test]
    async fn test_backend_failure_is_rejected() {
        let id = Uuid::new_v4();
        let backend = backend_with(id, true);
        backend.fail_next_write();
        let publisher = LocationPublisher::new(backend.clone());

        let sample = PositionSample::new(37.7251, -8.7831, Utc::now());
        let err = publisher.publish(id, &sample).await.unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));

        // next sample goes through
        assert!(publisher.publish(id, &sample).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_and_ping_respect_active_flag() {
        let id = Uuid::new_v4();
        let backend = backend_with(id, true);
        let publisher = LocationPublisher::new(backend.clone());

        publisher
            .set_status(id, false, ConductorStatus::OnTour)
            .await
            .unwrap();
        publisher.ping(id).await.unwrap();

        let row = backend.row(id).unwrap();
        assert!(!row.is_available);
        assert_eq!(row.status(), Some(ConductorStatus::OnTour));
        assert!(row.last_ping.is_some());
        assert!(row.updated_at.is_none());

        backend.set_active(id, false);
        assert!(matches!(
            publisher.ping(id).await,
            Err(PublishError::SkippedInactive(_))
        ));
    }
}
