use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::directory::{ChangeFeed, ChangeStream, DirectorySource};
use crate::models::{
    ActiveConductor, ActiveConductorView, ChangeEvent, ChangeOp, Conductor, ConductorId,
    ConductorStatus,
};
use crate::publisher::{ActiveConductorStore, ActiveRowFilter, PositionUpdate};

/// One conditional write as the backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub filter: ActiveRowFilter,
    pub rows_affected: u64,
}

#[derive(Default)]
struct Tables {
    conductors: HashMap<ConductorId, Conductor>,
    active: HashMap<ConductorId, ActiveConductor>,
    writes: Vec<WriteRecord>,
}

/// The Postgres tables plus the NOTIFY trigger, in process. Conditional
/// writes honour [`ActiveRowFilter`] and every affected row is pushed on a
/// broadcast changefeed.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    changes: broadcast::Sender<ChangeEvent>,
    fetches: AtomicU64,
    fail_write: AtomicBool,
    fail_fetch: AtomicBool,
    fail_subscribe: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_feed_capacity(256)
    }

    /// Subscribers that fall more than `capacity` events behind get a lag
    /// error instead of the dropped events.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity);
        Self {
            tables: Mutex::new(Tables::default()),
            changes,
            fetches: AtomicU64::new(0),
            fail_write: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, op: ChangeOp, conductor_id: ConductorId, record: Option<ActiveConductor>) {
        // no subscribers is fine
        let _ = self.changes.send(ChangeEvent {
            op,
            conductor_id,
            record,
        });
    }

    pub fn add_conductor(&self, conductor: Conductor) {
        self.tables().conductors.insert(conductor.id, conductor);
    }

    /// Admin toggle: upserts the `active_conductors` row keyed by conductor.
    pub fn set_active(&self, conductor_id: ConductorId, is_active: bool) {
        let (op, row) = {
            let mut tables = self.tables();
            match tables.active.get_mut(&conductor_id) {
                Some(row) => {
                    row.is_active = is_active;
                    (ChangeOp::Update, row.clone())
                }
                None => {
                    let row = ActiveConductor {
                        conductor_id,
                        is_active,
                        latitude: None,
                        longitude: None,
                        accuracy: None,
                        is_available: true,
                        status: ConductorStatus::Available.as_str().to_string(),
                        updated_at: None,
                        last_ping: None,
                    };
                    tables.active.insert(conductor_id, row.clone());
                    (ChangeOp::Insert, row)
                }
            }
        };
        self.notify(op, conductor_id, Some(row));
    }

    pub fn remove(&self, conductor_id: ConductorId) {
        let removed = self.tables().active.remove(&conductor_id);
        if removed.is_some() {
            self.notify(ChangeOp::Delete, conductor_id, None);
        }
    }

    pub fn row(&self, conductor_id: ConductorId) -> Option<ActiveConductor> {
        self.tables().active.get(&conductor_id).cloned()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.tables().writes.clone()
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_next_write(&self) {
        self.fail_write.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_fetch(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    fn conditional_write<F>(&self, filter: &ActiveRowFilter, apply: F) -> anyhow::Result<u64>
    where
        F: FnOnce(&mut ActiveConductor),
    {
        if self.fail_write.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("write rejected: connection reset"));
        }

        let changed = {
            let mut tables = self.tables();
            let changed = match tables.active.get_mut(&filter.conductor_id) {
                Some(row) if filter.matches(row) => {
                    apply(row);
                    Some(row.clone())
                }
                _ => None,
            };
            tables.writes.push(WriteRecord {
                filter: *filter,
                rows_affected: u64::from(changed.is_some()),
            });
            changed
        };

        match changed {
            Some(row) => {
                self.notify(ChangeOp::Update, filter.conductor_id, Some(row));
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl ActiveConductorStore for MemoryBackend {
    async fn update_position_if_active(
        &self,
        filter: &ActiveRowFilter,
        update: &PositionUpdate,
    ) -> anyhow::Result<u64> {
        self.conditional_write(filter, |row| {
            row.latitude = Some(update.latitude);
            row.longitude = Some(update.longitude);
            row.accuracy = update.accuracy;
            row.updated_at = Some(update.updated_at);
        })
    }

    async fn update_status_if_active(
        &self,
        filter: &ActiveRowFilter,
        is_available: bool,
        status: ConductorStatus,
    ) -> anyhow::Result<u64> {
        self.conditional_write(filter, |row| {
            row.is_available = is_available;
            row.status = status.as_str().to_string();
        })
    }

    async fn touch_ping_if_active(
        &self,
        filter: &ActiveRowFilter,
        at: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        self.conditional_write(filter, |row| {
            row.last_ping = Some(at);
        })
    }
}

impl DirectorySource for MemoryBackend {
    async fn fetch_active(&self) -> anyhow::Result<Vec<ActiveConductorView>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("fetch failed: connection refused"));
        }

        let tables = self.tables();
        let mut entries: Vec<_> = tables
            .active
            .values()
            .filter(|row| row.is_active)
            .filter_map(|row| {
                tables.conductors.get(&row.conductor_id).map(|c| {
                    ActiveConductorView::from_record(row, c.name.clone(), c.whatsapp.clone())
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self) -> anyhow::Result<ChangeStream> {
        if self.fail_subscribe.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("channel subscribe timed out"));
        }

        let rx = self.changes.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    Some((Err(anyhow!("changefeed lagged by {} events", n)), rx))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}
