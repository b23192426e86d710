use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use conductor_tracking::config::AppConfig;
use conductor_tracking::context::AppContext;
use conductor_tracking::db::{self, PgChangeFeed, PgStore};
use conductor_tracking::directory::ActiveConductorDirectory;
use conductor_tracking::feed::KafkaPositionSource;
use conductor_tracking::session::DriverSession;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(AppConfig::log_level())
        .init();

    // Load config
    let config = AppConfig::load()?;

    info!("Starting Conductor Tracking Service...");

    // Init DB
    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");

    let store = Arc::new(PgStore::new(pool.clone()));
    let roster = store
        .list_conductors()
        .await
        .context("failed to load conductor roster")?;
    let ctx = AppContext::new(config, roster);
    info!("Loaded {} conductors", ctx.roster_len());

    let directory = Arc::new(ActiveConductorDirectory::new(
        store.clone(),
        Arc::new(PgChangeFeed::new(pool)),
        ctx.config.refresh_policy,
    ));
    if let Err(e) = directory.mount().await {
        warn!("Directory mounted with error: {}", e);
    }
    let monitor = tokio::spawn(log_directory(directory.clone(), ctx.clone()));

    let session = ctx.config.conductor_id.map(|conductor_id| {
        info!("Tracking conductor {}", ctx.conductor_name(&conductor_id));
        let source = KafkaPositionSource::new(ctx.config.kafka.clone(), conductor_id);
        DriverSession::start(
            conductor_id,
            Arc::new(source),
            store.clone(),
            ctx.config.watch,
            ctx.config.ping_interval,
        )
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(session) = session {
        session.stop().await;
    }
    directory.unmount();
    monitor.abort();

    Ok(())
}

async fn log_directory(
    directory: Arc<ActiveConductorDirectory<PgStore, PgChangeFeed>>,
    ctx: AppContext,
) {
    let stale_after = chrono::Duration::from_std(ctx.config.stale_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(120));
    let mut updates = directory.subscribe_updates();

    while updates.changed().await.is_ok() {
        let snapshot = directory.snapshot().await;
        if let Some(error) = &snapshot.last_error {
            warn!("Directory error: {}", error);
        }
        let summary = snapshot.summary(Utc::now(), stale_after);
        info!(
            "Active conductors: {} ({} live, {} stale, {} unknown, {} available)",
            snapshot.entries.len(),
            summary.live,
            summary.stale,
            summary.unknown,
            summary.available
        );
    }
}
