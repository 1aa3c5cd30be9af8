//! Health check handlers for service monitoring.

use axum::{extract::State, Json};
use beacon_delivery::DownstreamMode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests
    pub status: &'static str,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Service version information
    pub version: &'static str,
    /// Event ids currently held by the idempotency cache
    pub cache_entries: usize,
    /// Active downstream implementation
    pub downstream_mode: DownstreamMode,
}

/// Liveness response structure.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// Always `"alive"`
    pub status: &'static str,
    /// When the check ran
    pub timestamp: DateTime<Utc>,
    /// Service name
    pub service: &'static str,
}

/// Reports service health along with cache size and downstream mode.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_entries = state.cache.len();
    debug!(cache_entries, "Performing health check");

    Json(HealthResponse {
        status: "healthy",
        timestamp: state.clock.now_utc(),
        version: env!("CARGO_PKG_VERSION"),
        cache_entries,
        downstream_mode: state.downstream_mode,
    })
}

/// Liveness probe; answers as long as the process is running.
pub async fn liveness_check(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive",
        timestamp: state.clock.now_utc(),
        service: "beacon-api",
    })
}
