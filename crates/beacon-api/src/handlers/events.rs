//! Conversion event ingestion handler.
//!
//! Validates the payload, suppresses recently seen event ids, normalizes the
//! event, and dispatches it downstream within the request. Every outcome is
//! answered with a structured JSON body.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use beacon_core::{
    transform, validate, BeaconError, RawEvent, RequestId, UpstreamErrorCode, UpstreamStatus,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::AppState;

/// Response for an event the downstream accepted.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    /// Always `"accepted"`
    pub status: &'static str,
    /// Identifier of this request
    pub request_id: RequestId,
    /// Downstream status of the successful attempt
    pub external_status: UpstreamStatus,
    /// Attempts made
    pub attempts: u32,
    /// Total handling time in milliseconds
    pub latency: u64,
}

/// Response for an event whose dispatch failed.
#[derive(Debug, Serialize)]
pub struct FailedResponse {
    /// Always `"failed"`
    pub status: &'static str,
    /// Identifier of this request
    pub request_id: RequestId,
    /// Last downstream status, or `"NETWORK_ERROR"`
    pub external_status: UpstreamStatus,
    /// Attempts made
    pub attempts: u32,
    /// Total handling time in milliseconds
    pub latency: u64,
    /// Always `"upstream_error"`
    pub error: &'static str,
    /// Classified downstream failure
    pub upstream_error: UpstreamErrorCode,
}

/// Response for an event id seen within the retention window.
#[derive(Debug, Serialize)]
pub struct DuplicateResponse {
    /// Always `"duplicate"`
    pub status: &'static str,
    /// Human-readable explanation
    pub message: String,
}

/// Response for a payload that failed validation.
#[derive(Debug, Serialize)]
pub struct InvalidPayloadResponse {
    /// Always `"invalid_payload"`
    pub error: &'static str,
    /// Every violation message, in check order
    pub details: Vec<String>,
}

/// Response for an unexpected internal failure.
#[derive(Debug, Serialize)]
pub struct InternalErrorResponse {
    /// Always `"error"`
    pub status: &'static str,
    /// Identifier of this request
    pub request_id: RequestId,
    /// Total handling time in milliseconds
    pub latency: u64,
    /// Always `"internal_server_error"`
    pub error: &'static str,
}

/// Accepts one conversion event.
///
/// Returns:
/// - 202: downstream accepted the event
/// - 200: event id already processed within the retention window
/// - 400: payload failed validation; every violation is listed
/// - 502: downstream rejected the event or kept failing
/// - 500: internal failure
///
/// A body that is not JSON is validated as an empty payload.
#[instrument(
    name = "ingest_event",
    skip_all,
    fields(request_id = %request_id, event_id = tracing::field::Empty)
)]
pub async fn ingest_event(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Response {
    let started = state.clock.now();
    let elapsed_ms = || millis(state.clock.now().saturating_duration_since(started));

    info!(content_length = body.len(), "Received event request");

    let payload: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
        debug!(error = %e, "Body is not JSON, validating as empty payload");
        Value::Null
    });

    let violations = validate(&payload);
    if !violations.is_empty() {
        warn!(
            violations = ?violations.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Validation failed"
        );
        return invalid_payload_response(&BeaconError::InvalidPayload { violations });
    }

    let event_id = payload.get("event_id").and_then(Value::as_str).unwrap_or_default().to_string();
    Span::current().record("event_id", event_id.as_str());

    let retention = state.cache.config().retention;
    if let Some(first_seen) = state.cache.lookup(&event_id) {
        let age = state.clock.now_utc() - first_seen;
        info!(age_secs = age.num_seconds(), "Duplicate event ignored");
        return duplicate_response(event_id, retention);
    }

    state.cache.record(event_id.clone(), state.clock.now_utc());

    let raw_event = match RawEvent::from_payload(&payload) {
        Ok(raw_event) => raw_event,
        Err(e) => {
            error!(error = %e, "Validated payload could not be extracted");
            return internal_error_response(&request_id, elapsed_ms());
        },
    };

    let normalized = transform(&raw_event);
    debug!(ts = normalized.ts, value_cents = normalized.value_cents, "Event normalized");

    let outcome = state.dispatcher.dispatch(&normalized).await;
    let latency = elapsed_ms();

    match outcome.failure() {
        None => {
            info!(attempts = outcome.attempts, latency_ms = latency, "Request completed successfully");
            (
                StatusCode::ACCEPTED,
                Json(AcceptedResponse {
                    status: "accepted",
                    request_id,
                    external_status: outcome.upstream_status,
                    attempts: outcome.attempts,
                    latency,
                }),
            )
                .into_response()
        },
        Some(err) => {
            warn!(error = %err, latency_ms = latency, "Request failed");
            upstream_failure_response(&err, request_id, latency)
        },
    }
}

/// Builds the generic 500 response.
pub fn internal_error_response(request_id: &RequestId, latency: u64) -> Response {
    let err = BeaconError::internal("request handling failed");
    (
        status_for(&err),
        Json(InternalErrorResponse {
            status: "error",
            request_id: request_id.clone(),
            latency,
            error: "internal_server_error",
        }),
    )
        .into_response()
}

/// Message returned for duplicates, e.g. "Event already processed within
/// 10 minutes".
pub fn duplicate_message(retention: Duration) -> String {
    format!("Event already processed within {}", describe_window(retention))
}

fn duplicate_response(event_id: String, retention: Duration) -> Response {
    let err = BeaconError::DuplicateEvent { event_id };
    (
        status_for(&err),
        Json(DuplicateResponse { status: "duplicate", message: duplicate_message(retention) }),
    )
        .into_response()
}

fn invalid_payload_response(err: &BeaconError) -> Response {
    let details = match err {
        BeaconError::InvalidPayload { violations } => {
            violations.iter().map(ToString::to_string).collect()
        },
        _ => Vec::new(),
    };

    (status_for(err), Json(InvalidPayloadResponse { error: "invalid_payload", details }))
        .into_response()
}

fn upstream_failure_response(err: &BeaconError, request_id: RequestId, latency: u64) -> Response {
    let (code, status, attempts) = match err {
        BeaconError::TerminalUpstream { code, status, attempts }
        | BeaconError::RetryableUpstream { code, status, attempts } => (*code, *status, *attempts),
        _ => return internal_error_response(&request_id, latency),
    };

    (
        status_for(err),
        Json(FailedResponse {
            status: "failed",
            request_id,
            external_status: status,
            attempts,
            latency,
            error: "upstream_error",
            upstream_error: code,
        }),
    )
        .into_response()
}

fn status_for(err: &BeaconError) -> StatusCode {
    StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (amount, unit) = match secs {
        s if s >= 3600 && s % 3600 == 0 => (s / 3600, "hour"),
        s if s >= 60 && s % 60 == 0 => (s / 60, "minute"),
        s => (s, "second"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural}")
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
