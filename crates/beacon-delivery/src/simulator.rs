//! Local stand-in for the conversions API.
//!
//! Answers every event with a status drawn from a weighted table and a body
//! shaped like the real API's, after a random latency. The default table is
//! mostly successes with a realistic mix of rejections, throttling, and
//! server errors, which exercises every dispatcher path.

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use async_trait::async_trait;
use beacon_core::{Clock, NormalizedEvent, UpstreamErrorCode};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    downstream::{Downstream, DownstreamResponse},
    error::{DeliveryError, Result},
};

/// Seconds advertised in simulated 429 bodies.
const SIMULATED_RETRY_AFTER_SECS: u64 = 2;

/// Weighted distribution over response statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityTable {
    entries: Vec<(u16, f64)>,
    total_weight: f64,
}

impl ProbabilityTable {
    /// Builds a table from `(status, weight)` pairs.
    ///
    /// Weights are relative; they need not sum to one.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if a weight is negative or
    /// non-finite, or if all weights sum to zero.
    pub fn new(entries: Vec<(u16, f64)>) -> Result<Self> {
        if let Some((status, weight)) =
            entries.iter().find(|(_, weight)| !weight.is_finite() || *weight < 0.0)
        {
            return Err(DeliveryError::configuration(format!(
                "invalid weight {weight} for simulated status {status}"
            )));
        }

        let total_weight: f64 = entries.iter().map(|(_, weight)| weight).sum();
        if total_weight <= 0.0 {
            return Err(DeliveryError::configuration("simulator weights must sum to more than 0"));
        }

        Ok(Self { entries, total_weight })
    }

    /// Picks the status for a roll in `0.0..1.0`.
    pub fn pick(&self, roll: f64) -> u16 {
        let target = roll.clamp(0.0, 1.0) * self.total_weight;
        let mut cumulative = 0.0;

        for (status, weight) in &self.entries {
            cumulative += weight;
            if target < cumulative {
                return *status;
            }
        }

        // Rounding can leave `target` equal to the total; fall back to the
        // last entry that can actually be drawn.
        self.entries
            .iter()
            .rev()
            .find(|(_, weight)| *weight > 0.0)
            .map_or(202, |(status, _)| *status)
    }

    /// Returns the `(status, weight)` pairs.
    pub fn entries(&self) -> &[(u16, f64)] {
        &self.entries
    }
}

impl Default for ProbabilityTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (202, 0.60),
                (400, 0.10),
                (401, 0.05),
                (403, 0.05),
                (429, 0.10),
                (500, 0.10),
            ],
            total_weight: 1.0,
        }
    }
}

/// Simulator configuration.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Status distribution.
    pub table: ProbabilityTable,
    /// Shortest simulated round trip.
    pub min_latency: Duration,
    /// Longest simulated round trip.
    pub max_latency: Duration,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            table: ProbabilityTable::default(),
            min_latency: Duration::from_millis(100),
            max_latency: Duration::from_millis(500),
            seed: None,
        }
    }
}

impl SimulatorConfig {
    fn latency_range_ms(&self) -> Result<RangeInclusive<u64>> {
        let min = u64::try_from(self.min_latency.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_latency.as_millis()).unwrap_or(u64::MAX);
        if min > max {
            return Err(DeliveryError::configuration(format!(
                "simulator min latency {min}ms exceeds max latency {max}ms"
            )));
        }
        Ok(min..=max)
    }
}

/// Downstream that fabricates responses locally.
#[derive(Debug)]
pub struct SimulatedDownstream {
    table: ProbabilityTable,
    latency_ms: RangeInclusive<u64>,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl SimulatedDownstream {
    /// Creates a simulator.
    ///
    /// Latency waits go through `clock`, so a test clock makes them instant.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the latency range is
    /// inverted.
    pub fn new(config: SimulatorConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let latency_ms = config.latency_range_ms()?;
        let rng = config.seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

        Ok(Self { table: config.table, latency_ms, rng: Mutex::new(rng), clock })
    }

    fn body_for(&self, status: u16) -> Value {
        match status {
            200..=299 => json!({
                "status": "accepted",
                "received_at": self.clock.now_utc().to_rfc3339(),
            }),
            429 => json!({
                "error": UpstreamErrorCode::RateLimited.as_str(),
                "retry_after": SIMULATED_RETRY_AFTER_SECS,
            }),
            other => json!({ "error": UpstreamErrorCode::for_status(other).as_str() }),
        }
    }
}

#[async_trait]
impl Downstream for SimulatedDownstream {
    async fn send(&self, event: &NormalizedEvent) -> Result<DownstreamResponse> {
        let (status_code, latency) = {
            let mut rng = self.rng.lock();
            let status = self.table.pick(rng.random::<f64>());
            let latency = Duration::from_millis(rng.random_range(self.latency_ms.clone()));
            (status, latency)
        };

        self.clock.sleep(latency).await;

        debug!(
            event_id = %event.id,
            status = status_code,
            latency_ms = latency.as_millis(),
            "Simulated downstream response"
        );

        Ok(DownstreamResponse { status_code, body: self.body_for(status_code), duration: latency })
    }
}
