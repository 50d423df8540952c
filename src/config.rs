use std::time::Duration;

/// Tunables for the booking engine. Every field has a default and can be
/// overridden by a `FLEETLOCK_*` environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Accept reservations that start before today (`FLEETLOCK_ALLOW_PAST_DATES`).
    pub allow_past_dates: bool,
    /// Max wait for a resource lock per attempt (`FLEETLOCK_LOCK_TIMEOUT_MS`).
    pub lock_timeout: Duration,
    /// Extra attempts after a lock-wait timeout (`FLEETLOCK_MAX_RETRIES`).
    pub max_retries: u32,
    /// Base backoff between attempts, doubled each retry (`FLEETLOCK_RETRY_BACKOFF_MS`).
    pub retry_backoff: Duration,
    /// How long an approved reservation may stay unpaid (`FLEETLOCK_PAYMENT_TTL_SECS`).
    pub payment_ttl: Duration,
    /// Expiry sweep period (`FLEETLOCK_REAPER_INTERVAL_SECS`).
    pub reaper_interval: Duration,
    /// WAL appends before compaction (`FLEETLOCK_COMPACT_THRESHOLD`).
    pub compact_threshold: u64,
    /// Lifecycle event buffer per subscriber (`FLEETLOCK_EVENT_CAPACITY`).
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_past_dates: false,
            lock_timeout: Duration::from_millis(2_000),
            max_retries: 2,
            retry_backoff: Duration::from_millis(25),
            payment_ttl: Duration::from_secs(30 * 60),
            reaper_interval: Duration::from_secs(30),
            compact_threshold: 1_000,
            event_capacity: 1_024,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let allow_past_dates = lookup("FLEETLOCK_ALLOW_PAST_DATES")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.allow_past_dates);

        Self {
            allow_past_dates,
            lock_timeout: parse("FLEETLOCK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            max_retries: parse("FLEETLOCK_MAX_RETRIES")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff: parse("FLEETLOCK_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            payment_ttl: parse("FLEETLOCK_PAYMENT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_ttl),
            reaper_interval: parse("FLEETLOCK_REAPER_INTERVAL_SECS")
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            compact_threshold: parse("FLEETLOCK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            event_capacity: parse("FLEETLOCK_EVENT_CAPACITY")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.event_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_gives_defaults() {
        assert_eq!(EngineConfig::from_lookup(|_| None), EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[
            ("FLEETLOCK_ALLOW_PAST_DATES", "true"),
            ("FLEETLOCK_LOCK_TIMEOUT_MS", "150"),
            ("FLEETLOCK_MAX_RETRIES", "5"),
            ("FLEETLOCK_PAYMENT_TTL_SECS", "60"),
            ("FLEETLOCK_COMPACT_THRESHOLD", "10"),
        ]));
        assert!(cfg.allow_past_dates);
        assert_eq!(cfg.lock_timeout, Duration::from_millis(150));
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.payment_ttl, Duration::from_secs(60));
        assert_eq!(cfg.compact_threshold, 10);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[
            ("FLEETLOCK_LOCK_TIMEOUT_MS", "soon"),
            ("FLEETLOCK_REAPER_INTERVAL_SECS", "0"),
            ("FLEETLOCK_EVENT_CAPACITY", "-3"),
        ]));
        let defaults = EngineConfig::default();
        assert_eq!(cfg.lock_timeout, defaults.lock_timeout);
        assert_eq!(cfg.reaper_interval, defaults.reaper_interval);
        assert_eq!(cfg.event_capacity, defaults.event_capacity);
    }
}
