//! Clock abstraction for idempotency windows and retry backoff.
//!
//! Request handling reads wall-clock time to stamp idempotency records and
//! sleeps between dispatch attempts. Both go through [`Clock`] so tests can
//! drive retention windows and backoff schedules without waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Source of time for the gateway.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant for latency measurements.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspends the calling task for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for deterministic tests.
///
/// Time only moves through [`advance`](Self::advance) or [`Clock::sleep`],
/// which advances by the requested duration and yields instead of waiting.
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    start_utc: DateTime<Utc>,
    start_instant: Instant,
    elapsed_ns: Arc<AtomicU64>,
    slept_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock starting at a fixed wall-clock time.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            start_utc: start,
            start_instant: Instant::now(),
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            slept_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Total time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    /// Total time spent in [`Clock::sleep`] calls.
    ///
    /// Lets tests assert on backoff schedules separately from manual advances.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.start_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.elapsed())
            .ok()
            .and_then(|elapsed| self.start_utc.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.slept_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
