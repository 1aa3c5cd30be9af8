//! In-memory idempotency cache keyed by caller-assigned event id.
//!
//! Records when each event id was first accepted. An id counts as a duplicate
//! while its record is younger than the retention window. A background
//! sweeper evicts stale records on its own interval, but [`lookup`] re-checks
//! the age itself, so correctness never depends on sweep timing.
//!
//! `lookup` followed by `record` is not atomic. Two concurrent first-time
//! submissions of the same id can both miss and both dispatch. This is weak
//! idempotency, not exactly-once.
//!
//! [`lookup`]: IdempotencyCache::lookup

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::time::Clock;

/// Shortest interval the background sweeper will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Idempotency cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long an event id is treated as already processed.
    pub retention: Duration,
    /// How often the background sweeper evicts expired records.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { retention: Duration::from_secs(10 * 60), sweep_interval: Duration::from_secs(5 * 60) }
    }
}

/// Process-wide map from event id to first-seen time.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: RwLock<HashMap<String, DateTime<Utc>>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl IdempotencyCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), config, clock }
    }

    /// Returns the cache configuration.
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns when `key` was first seen, if that is within the retention
    /// window.
    pub fn lookup(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now_utc();
        let first_seen = *self.entries.read().get(key)?;

        (!self.is_expired(first_seen, now)).then_some(first_seen)
    }

    /// Records `key` as seen at `timestamp`, replacing any older record.
    pub fn record(&self, key: impl Into<String>, timestamp: DateTime<Utc>) {
        self.entries.write().insert(key.into(), timestamp);
    }

    /// Evicts every record older than the retention window.
    ///
    /// Returns the number of evicted records.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_utc();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, first_seen| !self.is_expired(*first_seen, now));
        before - entries.len()
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true when no records are held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawns the background sweeper.
    ///
    /// The first sweep runs one full interval after spawning. The task exits
    /// when `cancel` fires. Intervals below [`MIN_SWEEP_INTERVAL`] are raised
    /// to it.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            info!(
                sweep_interval_secs = period.as_secs(),
                retention_secs = cache.config.retention.as_secs(),
                "idempotency sweeper starting"
            );

            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.sweep();
                        debug!(evicted, remaining = cache.len(), "idempotency sweep completed");
                    }
                }
            }

            info!("idempotency sweeper stopped");
        })
    }

    fn is_expired(&self, first_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - first_seen).to_std() {
            Ok(age) => age >= self.config.retention,
            // Recorded in the future relative to `now`.
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TestClock;

    fn cache_with_clock() -> (Arc<IdempotencyCache>, TestClock) {
        let clock = TestClock::new();
        let cache = Arc::new(IdempotencyCache::new(CacheConfig::default(), Arc::new(clock.clone())));
        (cache, clock)
    }

    #[test]
    fn absent_key_is_not_an_error() {
        let (cache, _clock) = cache_with_clock();
        assert_eq!(cache.lookup("evt_unknown"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn recorded_key_found_within_retention() {
        let (cache, clock) = cache_with_clock();
        let seen_at = clock.now_utc();

        cache.record("evt_1", seen_at);
        clock.advance(Duration::from_secs(9 * 60 + 59));

        assert_eq!(cache.lookup("evt_1"), Some(seen_at));
    }

    #[test]
    fn expired_key_absent_before_sweep() {
        let (cache, clock) = cache_with_clock();

        cache.record("evt_1", clock.now_utc());
        clock.advance(Duration::from_secs(10 * 60));

        assert_eq!(cache.lookup("evt_1"), None);
        assert_eq!(cache.len(), 1, "lookup must not depend on the sweeper");
    }

    #[test]
    fn record_replaces_expired_entry() {
        let (cache, clock) = cache_with_clock();

        cache.record("evt_1", clock.now_utc());
        clock.advance(Duration::from_secs(11 * 60));
        let second = clock.now_utc();
        cache.record("evt_1", second);

        assert_eq!(cache.lookup("evt_1"), Some(second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let (cache, clock) = cache_with_clock();

        cache.record("old", clock.now_utc());
        clock.advance(Duration::from_secs(6 * 60));
        cache.record("fresh", clock.now_utc());
        clock.advance(Duration::from_secs(5 * 60));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("fresh").is_some());
        assert!(cache.lookup("old").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_its_own_interval() {
        let clock = TestClock::new();
        let config =
            CacheConfig { retention: Duration::from_secs(60), sweep_interval: Duration::from_secs(300) };
        let cache = Arc::new(IdempotencyCache::new(config, Arc::new(clock.clone())));
        let cancel = CancellationToken::new();

        cache.record("evt_1", clock.now_utc());
        clock.advance(Duration::from_secs(120));
        let handle = cache.spawn_sweeper(cancel.clone());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(cache.len(), 1, "no sweep before the first interval elapses");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sweep_interval_is_clamped() {
        let clock = TestClock::new();
        let config = CacheConfig { retention: Duration::from_secs(60), sweep_interval: Duration::ZERO };
        let cache = Arc::new(IdempotencyCache::new(config, Arc::new(clock.clone())));
        let cancel = CancellationToken::new();

        cache.record("evt_1", clock.now_utc());
        clock.advance(Duration::from_secs(60));
        let handle = cache.spawn_sweeper(cancel.clone());

        tokio::time::sleep(MIN_SWEEP_INTERVAL + Duration::from_millis(10)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn concurrent_access_is_safe() {
        let (cache, clock) = cache_with_clock();
        let now = clock.now_utc();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..100 {
                        let key = format!("evt_{worker}_{i}");
                        cache.record(key.clone(), now);
                        assert!(cache.lookup(&key).is_some());
                    }
                });
            }
        });

        assert_eq!(cache.len(), 800);
    }
}
