use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use sqlx::postgres::PgListener;
use tracing::{error, info, warn};

use super::queries::NOTIFY_CHANNEL;
use super::DbPool;
use crate::directory::{ChangeFeed, ChangeStream};
use crate::models::ChangeEvent;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Realtime changefeed over Postgres LISTEN/NOTIFY. The trigger installed by
/// the migration publishes one JSON `ChangeEvent` per affected row.
///
/// Notifications sent while the connection is down are gone for good, so a
/// lost connection is reported as an error item once the listener is back.
#[derive(Clone)]
pub struct PgChangeFeed {
    pool: DbPool,
}

impl PgChangeFeed {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self) -> anyhow::Result<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        info!("Listening on channel: {}", NOTIFY_CHANNEL);

        let stream = futures::stream::unfold(listener, |mut listener| async move {
            let item = next_change(&mut listener).await;
            Some((item, listener))
        });

        Ok(stream.boxed())
    }
}

async fn next_change(listener: &mut PgListener) -> anyhow::Result<ChangeEvent> {
    loop {
        let notification = match listener.try_recv().await {
            Ok(Some(n)) => n,
            Ok(None) => {
                warn!("Lost connection on channel {}, reconnecting", NOTIFY_CHANNEL);
                // re-issues LISTEN on a fresh connection
                if let Err(e) = listener.listen(NOTIFY_CHANNEL).await {
                    error!("Failed to re-listen on {}: {}", NOTIFY_CHANNEL, e);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
                return Err(anyhow!(
                    "connection to {} lost, notifications may have been missed",
                    NOTIFY_CHANNEL
                ));
            }
            Err(e) => {
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                return Err(anyhow::Error::from(e));
            }
        };

        match serde_json::from_str::<ChangeEvent>(notification.payload()) {
            Ok(event) => return Ok(event),
            Err(e) => warn!("Failed to parse change notification: {}", e),
        }
    }
}
