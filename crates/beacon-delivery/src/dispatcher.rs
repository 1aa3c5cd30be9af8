//! Bounded-retry dispatch of one normalized event.
//!
//! Each call runs a small state machine:
//!
//! ```text
//! Attempting(n) ──2xx──────────────▶ Success
//!       │  ├──400/401/403/other──▶ TerminalFailure
//!       │  └──429/5xx/network───▶ RetryableFailure(n)
//!       ▲                                │
//!       └──── sleep(backoff) ◀── n < max ┘── n == max ──▶ TerminalFailure
//! ```
//!
//! Backoff waits go through the injected [`Clock`] and suspend only the
//! calling task.

use std::{sync::Arc, time::Duration};

use beacon_core::{BeaconError, Clock, NormalizedEvent, UpstreamErrorCode, UpstreamStatus};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    client::duration_millis,
    downstream::{Downstream, DownstreamResponse},
    error::DeliveryError,
    retry::{RetryDecision, RetryPolicy},
};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Attempt budget and backoff schedule.
    pub retry: RetryPolicy,
    /// Upper bound on a single downstream attempt.
    pub attempt_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { retry: RetryPolicy::default(), attempt_timeout: Duration::from_secs(5) }
    }
}

impl DispatcherConfig {
    /// Longest a single `dispatch` call can take: every attempt running to
    /// its timeout plus the full backoff schedule.
    pub fn worst_case_duration(&self) -> Duration {
        self.attempt_timeout
            .saturating_mul(self.retry.max_attempts)
            .saturating_add(self.retry.max_total_backoff())
    }
}

/// Final result of dispatching one event.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Whether the downstream accepted the event.
    pub success: bool,
    /// Status of the last attempt.
    pub upstream_status: UpstreamStatus,
    /// Attempts made, between 1 and the policy maximum.
    pub attempts: u32,
    /// Duration of the last attempt.
    pub latency: Duration,
    /// Duration of every attempt, in order.
    pub attempt_latencies: Vec<Duration>,
    /// Classified failure, when `success` is false.
    pub error: Option<UpstreamErrorCode>,
    /// Downstream response body, when `success` is true.
    pub response: Option<Value>,
}

impl DispatchOutcome {
    /// Converts a failed outcome into the gateway error taxonomy.
    pub fn failure(&self) -> Option<BeaconError> {
        if self.success {
            return None;
        }

        let code = self.error.unwrap_or(UpstreamErrorCode::UnexpectedStatus);
        let (status, attempts) = (self.upstream_status, self.attempts);

        Some(if code.is_retryable() {
            BeaconError::RetryableUpstream { code, status, attempts }
        } else {
            BeaconError::TerminalUpstream { code, status, attempts }
        })
    }
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Retryable(UpstreamErrorCode),
    Terminal(UpstreamErrorCode),
}

impl Verdict {
    fn for_status(status: u16) -> Self {
        if (200..300).contains(&status) {
            return Self::Success;
        }

        let code = UpstreamErrorCode::for_status(status);
        if code.is_retryable() {
            Self::Retryable(code)
        } else {
            Self::Terminal(code)
        }
    }

    fn for_error(error: &DeliveryError) -> Self {
        if error.is_retryable() {
            Self::Retryable(UpstreamErrorCode::NetworkError)
        } else {
            Self::Terminal(UpstreamErrorCode::NetworkError)
        }
    }

    fn error_code(self) -> Option<UpstreamErrorCode> {
        match self {
            Self::Success => None,
            Self::Retryable(code) | Self::Terminal(code) => Some(code),
        }
    }
}

#[derive(Debug)]
struct Attempt {
    number: u32,
    status: UpstreamStatus,
    verdict: Verdict,
    body: Option<Value>,
    latency: Duration,
}

#[derive(Debug)]
enum AttemptState {
    Attempting(u32),
    Success(Attempt),
    RetryableFailure(Attempt),
    TerminalFailure(Attempt),
}

/// Sends events downstream with classification and bounded retries.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    downstream: Arc<dyn Downstream>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        downstream: Arc<dyn Downstream>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self { downstream, clock, config }
    }

    /// Returns the dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatches one event until it succeeds, fails terminally, or runs out
    /// of attempts.
    ///
    /// Never fails: every downstream behavior maps to an outcome.
    pub async fn dispatch(&self, event: &NormalizedEvent) -> DispatchOutcome {
        let mut attempt_latencies = Vec::new();
        let mut state = AttemptState::Attempting(1);

        let last = loop {
            state = match state {
                AttemptState::Attempting(number) => {
                    let attempt = self.attempt(event, number).await;
                    attempt_latencies.push(attempt.latency);

                    match attempt.verdict {
                        Verdict::Success => AttemptState::Success(attempt),
                        Verdict::Retryable(_) => AttemptState::RetryableFailure(attempt),
                        Verdict::Terminal(_) => AttemptState::TerminalFailure(attempt),
                    }
                },
                AttemptState::RetryableFailure(attempt) => {
                    match self.config.retry.decide(attempt.number) {
                        RetryDecision::Retry { delay } => {
                            info!(
                                event_id = %event.id,
                                attempt = attempt.number,
                                status = %attempt.status,
                                delay_ms = delay.as_millis(),
                                "Retrying after backoff"
                            );
                            self.clock.sleep(delay).await;
                            AttemptState::Attempting(attempt.number + 1)
                        },
                        RetryDecision::GiveUp { reason } => {
                            warn!(
                                event_id = %event.id,
                                attempts = attempt.number,
                                status = %attempt.status,
                                %reason,
                                "Giving up on retryable failure"
                            );
                            AttemptState::TerminalFailure(attempt)
                        },
                    }
                },
                AttemptState::Success(attempt) | AttemptState::TerminalFailure(attempt) => {
                    break attempt;
                },
            };
        };

        let success = last.verdict == Verdict::Success;
        if success {
            info!(event_id = %event.id, attempts = last.number, status = %last.status, "Event dispatched");
        } else {
            warn!(
                event_id = %event.id,
                attempts = last.number,
                status = %last.status,
                error = ?last.verdict.error_code(),
                "Event dispatch failed"
            );
        }

        DispatchOutcome {
            success,
            upstream_status: last.status,
            attempts: last.number,
            latency: last.latency,
            attempt_latencies,
            error: last.verdict.error_code(),
            response: if success { last.body } else { None },
        }
    }

    async fn attempt(&self, event: &NormalizedEvent, number: u32) -> Attempt {
        let span = info_span!("dispatch_attempt", event_id = %event.id, attempt = number);

        async move {
            let started = self.clock.now();
            let result =
                tokio::time::timeout(self.config.attempt_timeout, self.downstream.send(event))
                    .await
                    .unwrap_or_else(|_| {
                        Err(DeliveryError::timeout(duration_millis(self.config.attempt_timeout)))
                    });
            let latency = self.clock.now().saturating_duration_since(started);

            let attempt = match result {
                Ok(DownstreamResponse { status_code, body, .. }) => Attempt {
                    number,
                    status: UpstreamStatus::Http(status_code),
                    verdict: Verdict::for_status(status_code),
                    body: Some(body),
                    latency,
                },
                Err(error) => {
                    warn!(%error, "Downstream unreachable");
                    Attempt {
                        number,
                        status: UpstreamStatus::NetworkError,
                        verdict: Verdict::for_error(&error),
                        body: None,
                        latency,
                    }
                },
            };

            debug!(
                status = %attempt.status,
                verdict = ?attempt.verdict,
                latency_ms = latency.as_millis(),
                "Attempt finished"
            );

            attempt
        }
        .instrument(span)
        .await
    }
}
