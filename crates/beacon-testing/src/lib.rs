//! Test infrastructure for deterministic gateway tests.
//!
//! Provides a scripted downstream, payload fixtures, a wiremock-backed mock
//! conversions API, and [`TestEnv`], which wires a test clock, an idempotency
//! cache, and a dispatcher together so backoff schedules and retention
//! windows run without real waiting.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use beacon_core::{CacheConfig, IdempotencyCache, TestClock};
use beacon_delivery::{Dispatcher, DispatcherConfig, Downstream, RetryPolicy};

pub mod downstream;
pub mod fixtures;
pub mod http;

pub use downstream::{ScriptedDownstream, ScriptedReply};
pub use fixtures::{unique_event_id, valid_payload, EventBuilder};
pub use http::MockConversionsApi;

/// Wired-up gateway components under a test clock.
pub struct TestEnv {
    /// Deterministic clock shared by every component
    pub clock: TestClock,
    /// Idempotency cache reading time from `clock`
    pub cache: Arc<IdempotencyCache>,
    /// Scripted downstream the dispatcher sends to
    pub downstream: Arc<ScriptedDownstream>,
    /// Dispatcher backing off on `clock`
    pub dispatcher: Arc<Dispatcher>,
}

impl TestEnv {
    /// Creates an environment with default settings and a downstream that
    /// always accepts.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a customized environment.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::default()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`TestEnv`].
#[derive(Debug)]
pub struct TestEnvBuilder {
    downstream: ScriptedDownstream,
    cache: CacheConfig,
    dispatcher: DispatcherConfig,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            downstream: ScriptedDownstream::always(202),
            cache: CacheConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl TestEnvBuilder {
    /// Uses the given scripted downstream.
    #[must_use]
    pub fn downstream(mut self, downstream: ScriptedDownstream) -> Self {
        self.downstream = downstream;
        self
    }

    /// Sets the idempotency retention window.
    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.cache.retention = retention;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.dispatcher.retry = retry;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.dispatcher.attempt_timeout = timeout;
        self
    }

    /// Builds the environment.
    pub fn build(self) -> TestEnv {
        let clock = TestClock::new();
        let cache = Arc::new(IdempotencyCache::new(self.cache, Arc::new(clock.clone())));
        let downstream = Arc::new(self.downstream);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&downstream) as Arc<dyn Downstream>,
            Arc::new(clock.clone()),
            self.dispatcher,
        ));

        TestEnv { clock, cache, downstream, dispatcher }
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::{EventName, NormalizedEvent, EVENT_SOURCE};

    use super::*;

    #[tokio::test]
    async fn dispatcher_uses_scripted_downstream_and_test_clock() {
        let env = TestEnv::builder().downstream(ScriptedDownstream::statuses([503])).build();
        let event = NormalizedEvent {
            id: "evt".into(),
            user: "user".into(),
            name: EventName::Purchase,
            ts: 0,
            value_cents: 100,
            campaign: "cmp".into(),
            source: EVENT_SOURCE.into(),
        };

        let outcome = env.dispatcher.dispatch(&event).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(env.downstream.call_count(), 2);
        assert_eq!(env.clock.total_slept(), Duration::from_secs(1));
    }
}
