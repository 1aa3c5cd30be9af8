//! Exponential backoff retry policy with optional jitter.
//!
//! Retries happen inline within one request, so delays are short and the
//! attempt budget is small. Jitter defaults to zero so the schedule is exactly
//! 1s, 2s, 4s, ... from the base delay.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Exponent cap; 2^20 times any sane base delay already exceeds `max_delay`.
const MAX_EXPONENT: u32 = 20;

/// Retry policy configuration for downstream dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
        }
    }
}

/// Outcome of consulting the policy after a retryable failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then make the next attempt.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
    },
    /// Stop retrying.
    GiveUp {
        /// Reason why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Checks that the policy can make progress.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for a zero attempt budget,
    /// a max delay below the base delay, or a jitter factor outside 0.0..=1.0.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be at least 1"));
        }
        if self.max_delay < self.base_delay {
            return Err(DeliveryError::configuration("max_delay must not be below base_delay"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(DeliveryError::configuration("jitter_factor must be within 0.0..=1.0"));
        }
        Ok(())
    }

    /// Decides what to do after attempt `attempt_number` (1-based) failed
    /// with a retryable error.
    pub fn decide(&self, attempt_number: u32) -> RetryDecision {
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exceeded", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.delay_after(attempt_number) }
    }

    /// Delay to wait after attempt `attempt_number` (1-based) failed.
    ///
    /// `base_delay * 2^(attempt_number - 1)`, capped at `max_delay`, with
    /// jitter applied inside the cap.
    pub fn delay_after(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(MAX_EXPONENT);
        let multiplier = 2_u32.saturating_pow(exponent);
        let delay = self.base_delay.checked_mul(multiplier).unwrap_or(self.max_delay);

        let capped_delay = std::cmp::min(delay, self.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor);

        std::cmp::min(jittered_delay, self.max_delay)
    }

    /// Upper bound on the summed backoff across the whole attempt budget,
    /// jitter included.
    pub fn max_total_backoff(&self) -> Duration {
        let mut total = Duration::ZERO;

        for attempt in 1..self.max_attempts {
            let delay = self.longest_delay_after(attempt);
            if delay >= self.max_delay {
                let remaining = self.max_attempts - attempt;
                return total.saturating_add(self.max_delay.saturating_mul(remaining));
            }
            total = total.saturating_add(delay);
        }

        total
    }

    fn longest_delay_after(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(MAX_EXPONENT);
        let nominal = self
            .base_delay
            .checked_mul(2_u32.saturating_pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        let stretch = 1.0 + self.jitter_factor.clamp(0.0, 1.0);

        Duration::try_from_secs_f64(nominal.as_secs_f64() * stretch)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Randomizes a delay by up to ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
