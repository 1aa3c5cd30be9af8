//! Shared application state handed to every handler.

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::{Clock, IdempotencyCache};
use beacon_delivery::{Dispatcher, Downstream, DownstreamMode, HttpDownstream, SimulatedDownstream};
use tracing::info;

use crate::config::Config;

/// Components shared by all requests.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Event ids seen within the retention window
    pub cache: Arc<IdempotencyCache>,
    /// Bounded-retry sender for accepted events
    pub dispatcher: Arc<Dispatcher>,
    /// Time source for request ids, idempotency stamps, and latency
    pub clock: Arc<dyn Clock>,
    /// Active downstream implementation, reported by the health check
    pub downstream_mode: DownstreamMode,
}

impl AppState {
    /// Assembles state from already built components.
    pub fn new(
        cache: Arc<IdempotencyCache>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        downstream_mode: DownstreamMode,
    ) -> Self {
        Self { cache, dispatcher, clock, downstream_mode }
    }

    /// Builds every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured downstream cannot be constructed.
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let downstream = build_downstream(config, Arc::clone(&clock))?;
        let cache = Arc::new(IdempotencyCache::new(config.to_cache_config(), Arc::clone(&clock)));
        let dispatcher = Arc::new(Dispatcher::new(
            downstream,
            Arc::clone(&clock),
            config.to_dispatcher_config(),
        ));

        Ok(Self::new(cache, dispatcher, clock, config.downstream_mode))
    }
}

/// Builds the downstream selected by `downstream_mode`.
///
/// # Errors
///
/// Returns an error if the HTTP client or simulator rejects its settings.
pub fn build_downstream(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<dyn Downstream>> {
    let downstream: Arc<dyn Downstream> = match config.downstream_mode {
        DownstreamMode::Http => {
            info!(
                url = %config.downstream_url,
                api_key = %config.api_key_masked(),
                "Using HTTP downstream"
            );
            Arc::new(
                HttpDownstream::new(config.to_client_config())
                    .context("Failed to build HTTP downstream")?,
            )
        },
        DownstreamMode::Simulated => {
            info!(
                min_latency_ms = config.simulator_min_latency_ms,
                max_latency_ms = config.simulator_max_latency_ms,
                "Using simulated downstream"
            );
            Arc::new(
                SimulatedDownstream::new(config.to_simulator_config(), clock)
                    .context("Failed to build simulated downstream")?,
            )
        },
    };

    Ok(downstream)
}
