use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use fleetlock::config::EngineConfig;
use fleetlock::engine::Engine;
use fleetlock::events::EventHub;
use fleetlock::reaper;
use fleetlock::registry::InMemoryRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FLEETLOCK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    fleetlock::observability::init(metrics_port)?;

    let data_dir = std::env::var("FLEETLOCK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let catalog = std::env::var("FLEETLOCK_CATALOG").ok();
    let config = EngineConfig::from_env();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let registry = match &catalog {
        Some(path) => InMemoryRegistry::from_json_file(Path::new(path))?,
        None => InMemoryRegistry::new(),
    };
    let events = Arc::new(EventHub::new(config.event_capacity));
    let wal_path = PathBuf::from(&data_dir).join("reservations.wal");
    let engine = Arc::new(Engine::new(
        wal_path,
        Arc::new(registry),
        events.clone(),
        config.clone(),
    )?);

    info!("fleetlock started");
    info!("  data_dir: {data_dir}");
    info!("  catalog: {}", catalog.as_deref().unwrap_or("none"));
    info!("  lock_timeout: {:?}, max_retries: {}", config.lock_timeout, config.max_retries);
    info!("  payment_ttl: {:?}", config.payment_ttl);
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    tokio::spawn(reaper::run_reaper(engine.clone()));
    tokio::spawn(reaper::run_compactor(engine.clone()));

    // Forward lifecycle events to the log as JSON lines.
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "fleetlock::events", "{line}"),
                    Err(e) => tracing::warn!("unserializable event: {e}"),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!("event forwarder lagged, skipped {n}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on SIGTERM/ctrl-c
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        tracing::error!("final compaction failed: {e}");
    }

    info!("fleetlock stopped");
    Ok(())
}
