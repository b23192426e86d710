use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::models::{ConductorId, FixMessage};
use crate::watcher::{PositionEvent, PositionSource, PositionStream};

/// Fixes reporting a worse accuracy than this are treated as coarse
/// (network-based) and dropped when high accuracy is requested.
pub const COARSE_ACCURACY_METERS: f64 = 100.0;

/// Device position feed read from a Kafka topic, filtered to one conductor.
pub struct KafkaPositionSource {
    config: KafkaConfig,
    conductor_id: ConductorId,
}

impl KafkaPositionSource {
    pub fn new(config: KafkaConfig, conductor_id: ConductorId) -> Self {
        Self {
            config,
            conductor_id,
        }
    }

    fn create_consumer(&self) -> anyhow::Result<StreamConsumer> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            // one group per conductor so every instance sees its whole feed
            .set(
                "group.id",
                format!("{}-{}", self.config.group_id, self.conductor_id),
            )
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("security.protocol", &self.config.security_protocol)
            .set("sasl.mechanism", &self.config.sasl_mechanism)
            .set("sasl.username", &self.config.username)
            .set("sasl.password", &self.config.password);

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[&self.config.topic])?;
        info!("Subscribed to topic: {}", self.config.topic);
        Ok(consumer)
    }
}

impl PositionSource for KafkaPositionSource {
    async fn watch(&self, high_accuracy: bool) -> anyhow::Result<PositionStream> {
        let consumer = self.create_consumer()?;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(consume_fixes(
            consumer,
            self.config.clone(),
            self.conductor_id,
            high_accuracy,
            tx,
        ));

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

/// Decodes one payload into an event for `conductor_id`, if it is one.
pub fn decode_fix(
    payload: &[u8],
    conductor_id: ConductorId,
    high_accuracy: bool,
) -> Option<PositionEvent> {
    let message: FixMessage = match serde_json::from_slice(payload) {
        Ok(m) => m,
        Err(e) => {
            warn!("Failed to parse fix message: {}", e);
            return None;
        }
    };

    if message.conductor_id != conductor_id {
        return None;
    }
    if let Some(detail) = &message.error_message {
        debug!("Device reported: {}", detail);
    }

    let event = message.to_event(Utc::now())?;
    if let PositionEvent::Fix(sample) = &event {
        if high_accuracy && sample.accuracy.is_some_and(|a| a > COARSE_ACCURACY_METERS) {
            debug!("Dropping coarse fix ({:?}m)", sample.accuracy);
            return None;
        }
    }
    Some(event)
}

/// Consumer loop with the circuit breaker: after `max_retries` consecutive
/// receive errors it sleeps for the cooldown before resuming.
async fn consume_fixes(
    consumer: StreamConsumer,
    config: KafkaConfig,
    conductor_id: ConductorId,
    high_accuracy: bool,
    tx: mpsc::UnboundedSender<PositionEvent>,
) {
    let mut consecutive_failures = 0;
    let max_retries = config.max_retries;
    let cooldown_duration = Duration::from_secs(config.circuit_breaker_cooldown);

    loop {
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures, config.circuit_breaker_cooldown
            );
            tokio::select! {
                _ = tx.closed() => break,
                _ = tokio::time::sleep(cooldown_duration) => {}
            }
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            _ = tx.closed() => break,
            received = consumer.recv() => received,
        };

        let failed = match received {
            Ok(m) => {
                consecutive_failures = 0;

                let Some(payload) = m.payload() else {
                    warn!("Received empty payload from Kafka");
                    continue;
                };

                if let Some(event) = decode_fix(payload, conductor_id, high_accuracy) {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                false
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "Kafka error: {}. Failure count ({} / {})",
                    e, consecutive_failures, max_retries
                );
                true
            }
        };

        if failed {
            // avoid a tight loop on short network glitches
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    info!("Position feed for {} closed", conductor_id);
}
