use std::sync::Mutex;

use anyhow::anyhow;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::watcher::{PositionEvent, PositionSource, PositionStream};

pub mod kafka;

pub use kafka::KafkaPositionSource;

/// Position source fed from inside the process. The receiving end can be
/// watched once; a second `watch` fails.
pub struct ChannelPositionSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<PositionEvent>>>,
}

impl ChannelPositionSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<PositionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl PositionSource for ChannelPositionSource {
    async fn watch(&self, _high_accuracy: bool) -> anyhow::Result<PositionStream> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| anyhow!("position channel lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("position channel already watched"))?;

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSample;
    use chrono::Utc;

    #[tokio::test]
    async fn test_channel_source_watches_once() {
        let (source, tx) = ChannelPositionSource::new();
        let mut stream = source.watch(true).await.unwrap();

        let sample = PositionSample::new(37.725, -8.783, Utc::now());
        tx.send(PositionEvent::Fix(sample.clone())).unwrap();
        assert_eq!(stream.next().await, Some(PositionEvent::Fix(sample)));

        assert!(source.watch(true).await.is_err());

        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
