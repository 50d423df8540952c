use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_CREATED_TOTAL: &str = "fleetlock_reservations_created_total";

/// Counter: failed creation attempts. Labels: reason.
pub const RESERVATION_REJECTIONS_TOTAL: &str = "fleetlock_reservation_rejections_total";

/// Histogram: end-to-end `create_reservation` latency in seconds.
pub const CREATE_DURATION_SECONDS: &str = "fleetlock_create_duration_seconds";

/// Counter: applied lifecycle transitions. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "fleetlock_transitions_total";

/// Counter: refused lifecycle transitions. Labels: transition, reason.
pub const TRANSITION_FAILURES_TOTAL: &str = "fleetlock_transition_failures_total";

/// Counter: recorded payment outcomes. Labels: outcome.
pub const PAYMENTS_RECORDED_TOTAL: &str = "fleetlock_payments_recorded_total";

// ── USE metrics (contention and background work) ────────────────

/// Histogram: time spent waiting for a resource lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "fleetlock_lock_wait_seconds";

/// Counter: creation attempts retried after a lock-wait timeout.
pub const LOCK_RETRIES_TOTAL: &str = "fleetlock_lock_retries_total";

/// Counter: lifecycle events handed to the hub. Labels: kind.
pub const EVENTS_PUBLISHED_TOTAL: &str = "fleetlock_events_published_total";

/// Counter: unpaid reservations cancelled by the reaper.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "fleetlock_reservations_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetlock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
