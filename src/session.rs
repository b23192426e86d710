use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::models::{ConductorId, PositionSample};
use crate::publisher::{ActiveConductorStore, LocationPublisher, PublishError, PublishOutcome};
use crate::watcher::{GeolocationError, LocationWatcher, PositionSource, WatchOptions};

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    skipped_inactive: AtomicU64,
    rejected: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub published: u64,
    pub skipped_inactive: u64,
    pub rejected: u64,
    pub last_error: Option<String>,
}

/// One conductor's tracking session: watcher into publisher, plus a heartbeat.
pub struct DriverSession<P: PositionSource> {
    conductor_id: ConductorId,
    watcher: LocationWatcher<P>,
    counters: Arc<Counters>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<P: PositionSource> DriverSession<P> {
    pub fn start<S: ActiveConductorStore>(
        conductor_id: ConductorId,
        source: Arc<P>,
        store: Arc<S>,
        options: WatchOptions,
        ping_interval: Duration,
    ) -> Self {
        let (fix_tx, fix_rx) = mpsc::unbounded_channel();
        let watcher = LocationWatcher::new(source, options, fix_tx);
        watcher.start();

        let publisher = LocationPublisher::new(store);
        let counters = Arc::new(Counters::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(publish_loop(
            conductor_id,
            publisher,
            fix_rx,
            ping_interval,
            counters.clone(),
            shutdown_rx,
        ));
        info!("Tracking session started for conductor {}", conductor_id);

        Self {
            conductor_id,
            watcher,
            counters,
            shutdown,
            task,
        }
    }

    pub fn geolocation_error(&self) -> Option<GeolocationError> {
        self.watcher.last_error()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            published: self.counters.published.load(Ordering::SeqCst),
            skipped_inactive: self.counters.skipped_inactive.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            last_error: self.counters.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    /// Stops watching and waits for the publish loop. A write already in
    /// flight is allowed to finish.
    pub async fn stop(self) {
        self.watcher.stop();
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Publish loop ended abnormally: {}", e);
        }
        info!("Tracking session stopped for conductor {}", self.conductor_id);
    }
}

fn remember(counters: &Counters, error: Option<String>) {
    if let Ok(mut last) = counters.last_error.lock() {
        *last = error;
    }
}

async fn publish_fix<S: ActiveConductorStore>(
    conductor_id: ConductorId,
    publisher: &LocationPublisher<S>,
    sample: &PositionSample,
    counters: &Counters,
) {
    match publisher.publish(conductor_id, sample).await {
        Ok(PublishOutcome::Written { updated_at }) => {
            counters.published.fetch_add(1, Ordering::SeqCst);
            remember(counters, None);
            debug!(
                "Published {:.6},{:.6} for {} at {}",
                sample.latitude, sample.longitude, conductor_id, updated_at
            );
        }
        Err(e @ PublishError::SkippedInactive(_)) => {
            counters.skipped_inactive.fetch_add(1, Ordering::SeqCst);
            info!("{}", e);
            remember(counters, Some(e.to_string()));
        }
        Err(e @ PublishError::Rejected(_)) => {
            counters.rejected.fetch_add(1, Ordering::SeqCst);
            warn!("{}", e);
            remember(counters, Some(e.to_string()));
        }
    }
}

async fn publish_loop<S: ActiveConductorStore>(
    conductor_id: ConductorId,
    publisher: LocationPublisher<S>,
    mut fixes: mpsc::UnboundedReceiver<PositionSample>,
    ping_interval: Duration,
    counters: Arc<Counters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            fix = fixes.recv() => match fix {
                Some(sample) => publish_fix(conductor_id, &publisher, &sample, &counters).await,
                None => break,
            },
            _ = ping.tick() => {
                if let Err(e) = publisher.ping(conductor_id).await {
                    debug!("Ping for {} not written: {}", conductor_id, e);
                }
            }
        }
    }
}
