use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::lifecycle::{Actor, Transition};

/// Cancel approved reservations whose payment never completed within
/// `payment_ttl`, freeing their dates. Returns how many were cancelled.
pub async fn expire_unpaid(engine: &Engine) -> usize {
    let ttl = chrono::Duration::from_std(engine.config().payment_ttl).unwrap_or(chrono::Duration::MAX);
    let cutoff = engine
        .clock
        .now()
        .checked_sub_signed(ttl)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    let stale = engine.collect_unpaid_expired(cutoff);
    if stale.is_empty() {
        return 0;
    }

    let outcomes = join_all(
        stale
            .iter()
            .map(|id| engine.transition(*id, Transition::Cancel, &Actor::System)),
    )
    .await;

    let mut cancelled = 0;
    for (id, outcome) in stale.iter().zip(outcomes) {
        match outcome {
            Ok(_) => {
                cancelled += 1;
                info!("expired unpaid reservation {id}");
            }
            // Paid or cancelled in the meantime.
            Err(e) => debug!("expiry skip {id}: {e}"),
        }
    }
    metrics::counter!(crate::observability::RESERVATIONS_EXPIRED_TOTAL).increment(cancelled as u64);
    cancelled
}

/// Background task that periodically expires unpaid reservations.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config().reaper_interval);
    loop {
        interval.tick().await;
        expire_unpaid(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>) {
    let threshold = engine.config().compact_threshold;
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if threshold == 0 || appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
