//! Beacon conversion event gateway.
//!
//! Main entry point for the Beacon server. Loads configuration, wires the
//! idempotency cache and dispatcher, and coordinates startup and graceful
//! shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_api::{create_router, shutdown_signal, start_server, AppState, Config};
use beacon_core::{Clock, RealClock};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Beacon conversion gateway");
    info!(config = ?config, "Configuration loaded");

    let addr = config.parse_server_addr()?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let state = AppState::from_config(&config, clock)?;

    let cancel = CancellationToken::new();
    let sweeper = state.cache.spawn_sweeper(cancel.clone());

    let app = create_router(state, config.request_timeout());

    info!(
        %addr,
        downstream_mode = %config.downstream_mode,
        "Beacon is ready to receive events"
    );

    let served = start_server(app, addr, shutdown_signal()).await;

    cancel.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Idempotency sweeper terminated abnormally");
    }

    served.context("HTTP server failed")?;

    info!("Beacon shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}
