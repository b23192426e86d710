use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::geo::haversine_meters;
use crate::models::PositionSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
}

impl GeolocationError {
    /// Maps the platform's numeric error codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(GeolocationError::PermissionDenied),
            2 => Some(GeolocationError::PositionUnavailable),
            3 => Some(GeolocationError::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Fix(PositionSample),
    Error(GeolocationError),
}

pub type PositionStream = BoxStream<'static, PositionEvent>;

/// Platform seam: anything able to report the device position continuously.
pub trait PositionSource: Send + Sync + 'static {
    fn watch(&self, high_accuracy: bool) -> impl Future<Output = anyhow::Result<PositionStream>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    pub min_interval: Duration,
    pub min_delta_meters: f64,
    pub high_accuracy: bool,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(3000),
            min_delta_meters: 10.0,
            high_accuracy: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Forward,
    SuppressInterval { elapsed_ms: i64 },
    SuppressDistance { meters: f64 },
}

/// A usable distance threshold: finite and not negative.
pub fn valid_delta(meters: f64) -> bool {
    meters.is_finite() && meters >= 0.0
}

/// Interval and distance gate measured against the last forwarded sample.
/// Suppressed samples never move the baseline.
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    min_interval: chrono::Duration,
    min_delta_meters: f64,
    baseline: Option<PositionSample>,
}

impl ThrottleGate {
    pub fn new(options: &WatchOptions) -> Self {
        // NaN would compare false and let every fix through
        let min_delta_meters = if valid_delta(options.min_delta_meters) {
            options.min_delta_meters
        } else {
            let fallback = WatchOptions::default().min_delta_meters;
            warn!(
                "Invalid minimum distance {}, using {} m",
                options.min_delta_meters, fallback
            );
            fallback
        };

        Self {
            min_interval: chrono::Duration::from_std(options.min_interval)
                .unwrap_or_else(|_| chrono::Duration::max_value()),
            min_delta_meters,
            baseline: None,
        }
    }

    pub fn baseline(&self) -> Option<&PositionSample> {
        self.baseline.as_ref()
    }

    pub fn evaluate(&mut self, sample: &PositionSample) -> GateDecision {
        if let Some(last) = &self.baseline {
            let elapsed = sample.captured_at - last.captured_at;
            if elapsed < self.min_interval {
                return GateDecision::SuppressInterval {
                    elapsed_ms: elapsed.num_milliseconds(),
                };
            }

            let meters = haversine_meters(&last.point(), &sample.point());
            if meters < self.min_delta_meters {
                return GateDecision::SuppressDistance { meters };
            }
        }

        self.baseline = Some(sample.clone());
        GateDecision::Forward
    }
}

pub struct LocationWatcher<S: PositionSource> {
    source: Arc<S>,
    options: WatchOptions,
    forward: mpsc::UnboundedSender<PositionSample>,
    last_error: Arc<Mutex<Option<GeolocationError>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: PositionSource> LocationWatcher<S> {
    pub fn new(
        source: Arc<S>,
        options: WatchOptions,
        forward: mpsc::UnboundedSender<PositionSample>,
    ) -> Self {
        Self {
            source,
            options,
            forward,
            last_error: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<GeolocationError> {
        self.last_error.lock().ok().and_then(|e| *e)
    }

    /// Begins watching. Returns `false` when a watch is already running.
    pub fn start(&self) -> bool {
        let Ok(mut task) = self.task.lock() else {
            return false;
        };
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Watcher already running, start ignored");
            return false;
        }

        let source = self.source.clone();
        let options = self.options;
        let forward = self.forward.clone();
        let last_error = self.last_error.clone();

        *task = Some(tokio::spawn(async move {
            run_watch(source, options, forward, last_error).await;
        }));
        true
    }

    /// Cancels the watch. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            info!("Location watch stopped");
        }
    }
}

impl<S: PositionSource> Drop for LocationWatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_error(slot: &Mutex<Option<GeolocationError>>, error: Option<GeolocationError>) {
    if let Ok(mut last) = slot.lock() {
        *last = error;
    }
}

async fn run_watch<S: PositionSource>(
    source: Arc<S>,
    options: WatchOptions,
    forward: mpsc::UnboundedSender<PositionSample>,
    last_error: Arc<Mutex<Option<GeolocationError>>>,
) {
    let mut stream = match source.watch(options.high_accuracy).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not open position source: {}", e);
            record_error(&last_error, Some(GeolocationError::PositionUnavailable));
            return;
        }
    };
    info!(
        "Location watch started (min_interval={:?}, min_delta={}m, high_accuracy={})",
        options.min_interval, options.min_delta_meters, options.high_accuracy
    );

    let mut gate = ThrottleGate::new(&options);

    while let Some(event) = stream.next().await {
        match event {
            PositionEvent::Fix(sample) => {
                if !sample.point().is_valid() {
                    warn!("Dropping invalid fix: {:?}", sample);
                    continue;
                }
                match gate.evaluate(&sample) {
                    GateDecision::Forward => {
                        record_error(&last_error, None);
                        if forward.send(sample).is_err() {
                            debug!("Fix receiver dropped, ending watch");
                            break;
                        }
                    }
                    GateDecision::SuppressInterval { elapsed_ms } => {
                        debug!("Fix suppressed: {}ms since last forwarded", elapsed_ms);
                    }
                    GateDecision::SuppressDistance { meters } => {
                        debug!("Fix suppressed: moved {:.1}m", meters);
                    }
                }
            }
            PositionEvent::Error(e) => {
                warn!("Geolocation error: {}", e);
                record_error(&last_error, Some(e));
            }
        }
    }

    debug!("Position stream ended");
}
