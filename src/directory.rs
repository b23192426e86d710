use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::models::{ActiveConductorView, ChangeEvent, ChangeOp, Freshness};

pub type ChangeStream = BoxStream<'static, anyhow::Result<ChangeEvent>>;

pub trait DirectorySource: Send + Sync + 'static {
    /// Active rows joined with conductor names, ordered by name.
    fn fetch_active(&self) -> impl Future<Output = anyhow::Result<Vec<ActiveConductorView>>> + Send;
}

pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(&self) -> impl Future<Output = anyhow::Result<ChangeStream>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("failed to load active conductors: {0}")]
    FetchFailed(String),
    #[error("realtime subscription failed: {0}")]
    SubscribeFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPolicy {
    /// Re-run the full fetch on every change notification.
    #[default]
    Refetch,
    /// Apply the row carried by the notification; fetch only when it can't
    /// be applied locally.
    Delta,
}

impl std::str::FromStr for RefreshPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "refetch" => Ok(RefreshPolicy::Refetch),
            "delta" => Ok(RefreshPolicy::Delta),
            other => Err(format!("unknown refresh policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub entries: Vec<ActiveConductorView>,
    pub last_error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Bumped on every change to the view.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorySummary {
    pub live: usize,
    pub stale: usize,
    pub unknown: usize,
    pub available: usize,
}

impl DirectorySnapshot {
    pub fn get(&self, conductor_id: &uuid::Uuid) -> Option<&ActiveConductorView> {
        self.entries.iter().find(|e| &e.conductor_id == conductor_id)
    }

    pub fn summary(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> DirectorySummary {
        let mut summary = DirectorySummary::default();
        for entry in &self.entries {
            match entry.freshness(now, stale_after) {
                Freshness::Live => summary.live += 1,
                Freshness::Stale => summary.stale += 1,
                Freshness::Unknown => summary.unknown += 1,
            }
            if entry.is_available {
                summary.available += 1;
            }
        }
        summary
    }
}

struct Shared<D> {
    source: Arc<D>,
    state: RwLock<DirectorySnapshot>,
    updates: watch::Sender<u64>,
    /// Held from the start of a fetch until its rows are written, and while
    /// a delta is applied, so older rows never overwrite a newer change.
    apply: AsyncMutex<()>,
}

impl<D: DirectorySource> Shared<D> {
    async fn refetch(&self) -> Result<(), DirectoryError> {
        let _apply = self.apply.lock().await;
        match self.source.fetch_active().await {
            Ok(entries) => {
                let mut state = self.state.write().await;
                debug!("Directory fetched {} active conductors", entries.len());
                state.entries = entries;
                state.last_error = None;
                state.fetched_at = Some(Utc::now());
                self.bump(&mut state);
                Ok(())
            }
            Err(e) => {
                let err = DirectoryError::FetchFailed(e.to_string());
                self.record_error(&err).await;
                Err(err)
            }
        }
    }

    async fn record_error(&self, err: &DirectoryError) {
        error!("{}", err);
        let mut state = self.state.write().await;
        state.last_error = Some(err.to_string());
        self.bump(&mut state);
    }

    fn bump(&self, state: &mut DirectorySnapshot) {
        state.version += 1;
        self.updates.send_replace(state.version);
    }

    /// Applies a pushed row to the view. Returns `false` when the event
    /// can't be applied locally and a full fetch is required.
    async fn apply_delta(&self, event: &ChangeEvent) -> bool {
        let _apply = self.apply.lock().await;
        let mut state = self.state.write().await;

        let record = match (event.op, &event.record) {
            (ChangeOp::Delete, _) => {
                state.entries.retain(|e| e.conductor_id != event.conductor_id);
                self.bump(&mut state);
                return true;
            }
            (_, None) => return false,
            (_, Some(record)) => record,
        };

        if !record.is_active {
            state.entries.retain(|e| e.conductor_id != record.conductor_id);
            self.bump(&mut state);
            return true;
        }

        let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.conductor_id == record.conductor_id)
        else {
            // newly active conductor, the name comes from the join
            return false;
        };

        *entry = ActiveConductorView::from_record(record, entry.name.clone(), entry.whatsapp.clone());
        self.bump(&mut state);
        true
    }
}

pub struct ActiveConductorDirectory<D: DirectorySource, F: ChangeFeed> {
    shared: Arc<Shared<D>>,
    feed: Arc<F>,
    policy: RefreshPolicy,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<D: DirectorySource, F: ChangeFeed> ActiveConductorDirectory<D, F> {
    pub fn new(source: Arc<D>, feed: Arc<F>, policy: RefreshPolicy) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                source,
                state: RwLock::new(DirectorySnapshot::default()),
                updates,
                apply: AsyncMutex::new(()),
            }),
            feed,
            policy,
            task: Mutex::new(None),
        }
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        self.shared.state.read().await.clone()
    }

    /// Notified with the snapshot version after every change to the view.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Subscribes to the changefeed and loads the active set. Subscribing
    /// first means changes racing the initial fetch are replayed after it.
    /// A failed fetch is recorded but the subscription still goes ahead.
    pub async fn mount(&self) -> Result<(), DirectoryError> {
        if self.is_mounted() {
            debug!("Directory already mounted");
            return Ok(());
        }

        let subscribed = self.feed.subscribe().await;
        let fetched = self.shared.refetch().await;

        let stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                let err = DirectoryError::SubscribeFailed(e.to_string());
                self.shared.record_error(&err).await;
                return Err(err);
            }
        };

        let shared = self.shared.clone();
        let policy = self.policy;
        let handle = tokio::spawn(async move {
            follow_changes(shared, stream, policy).await;
        });

        if let Ok(mut task) = self.task.lock() {
            if let Some(old) = task.replace(handle) {
                old.abort();
            }
        }
        info!("Directory mounted (policy={:?})", policy);

        fetched
    }

    /// Manual full re-fetch; clears the retained error on success.
    pub async fn refresh(&self) -> Result<(), DirectoryError> {
        self.shared.refetch().await
    }

    /// Drops the changefeed subscription. No view updates happen afterwards.
    pub fn unmount(&self) {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            info!("Directory unmounted");
        }
    }
}

impl<D: DirectorySource, F: ChangeFeed> Drop for ActiveConductorDirectory<D, F> {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn follow_changes<D: DirectorySource>(
    shared: Arc<Shared<D>>,
    mut stream: ChangeStream,
    policy: RefreshPolicy,
) {
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                // missed events are never replayed, reload and keep the error visible
                let err = DirectoryError::SubscribeFailed(e.to_string());
                if shared.refetch().await.is_ok() {
                    shared.record_error(&err).await;
                }
                continue;
            }
        };
        debug!("Change {:?} for conductor {}", event.op, event.conductor_id);

        let applied = match policy {
            RefreshPolicy::Refetch => false,
            RefreshPolicy::Delta => shared.apply_delta(&event).await,
        };
        if !applied {
            // error already retained in the snapshot
            let _ = shared.refetch().await;
        }
    }

    warn!("Changefeed closed");
    shared
        .record_error(&DirectoryError::SubscribeFailed("changefeed closed".to_string()))
        .await;
}
