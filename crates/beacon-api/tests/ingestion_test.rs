//! Integration tests for the event ingestion endpoint.
//!
//! Drives `POST /events` through the full router with a scripted downstream
//! and a test clock, covering validation, duplicate suppression, and
//! downstream outcomes.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use beacon_testing::{valid_payload, EventBuilder, ScriptedDownstream, ScriptedReply, TestEnv};
use common::{post_event, post_raw, router_for};
use serde_json::json;

#[tokio::test]
async fn accepted_event_returns_202() {
    let env = TestEnv::new();
    let payload = EventBuilder::new().event_id("evt_accept").value(19.99).build();

    let response = post_event(router_for(&env), &payload).await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "accepted");
    assert_eq!(response.body["external_status"], 202);
    assert_eq!(response.body["attempts"], 1);
    assert!(response.body["latency"].is_u64());
    assert_eq!(response.body["request_id"].as_str(), response.request_id.as_deref());

    let sent = env.downstream.received();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, "evt_accept");
    assert_eq!(sent[0].value_cents, 1999);
    assert_eq!(sent[0].ts, 1_704_067_200);
}

#[tokio::test]
async fn request_id_has_expected_shape() {
    let env = TestEnv::new();

    let response = post_event(router_for(&env), &valid_payload()).await;

    let request_id = response.request_id.expect("x-request-id header should be set");
    let parts: Vec<&str> = request_id.splitn(3, '_').collect();
    assert_eq!(parts[0], "req");
    assert!(parts[1].parse::<i64>().is_ok());
    assert_eq!(parts[2].len(), 9);
    assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
}

#[tokio::test]
async fn invalid_payload_lists_every_violation() {
    let env = TestEnv::new();
    let payload = json!({
        "event_id": "",
        "user_id": 7,
        "event_name": "signup",
        "event_time": "2024-01-01T00:00:00Z",
        "value": "19.99",
        "campaign_id": "cmp"
    });

    let response = post_event(router_for(&env), &payload).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "invalid_payload");
    assert_eq!(
        response.body["details"],
        json!([
            "event_id must be a string",
            "user_id must be a string",
            r#"event_name must be "purchase" or "lead""#,
            "value must be a number"
        ])
    );
    assert_eq!(env.downstream.call_count(), 0);
    assert!(env.cache.is_empty(), "invalid events must not be recorded");
}

#[tokio::test]
async fn non_json_body_is_validated_as_empty() {
    let env = TestEnv::new();

    let response = post_raw(router_for(&env), "definitely not json").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["details"].as_array().map(Vec::len), Some(6));
}

#[tokio::test]
async fn unparseable_event_time_is_rejected() {
    let env = TestEnv::new();
    let payload = EventBuilder::new().field("event_time", json!("2024-13-45T99:00:00Z")).build();

    let response = post_event(router_for(&env), &payload).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["details"], json!(["event_time must be a valid ISO-8601 date string"]));
}

#[tokio::test]
async fn duplicate_event_returns_200_without_dispatch() {
    let env = TestEnv::new();
    let payload = EventBuilder::new().event_id("evt_dup").build();

    let first = post_event(router_for(&env), &payload).await;
    let second = post_event(router_for(&env), &payload).await;

    assert_eq!(first.status, StatusCode::ACCEPTED);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(
        second.body,
        json!({"status": "duplicate", "message": "Event already processed within 10 minutes"})
    );
    assert_eq!(env.downstream.call_count(), 1);
}

#[tokio::test]
async fn failed_event_is_still_treated_as_duplicate() {
    let env = TestEnv::builder().downstream(ScriptedDownstream::always(400)).build();
    let payload = EventBuilder::new().event_id("evt_rejected").build();

    let first = post_event(router_for(&env), &payload).await;
    let second = post_event(router_for(&env), &payload).await;

    assert_eq!(first.status, StatusCode::BAD_GATEWAY);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["status"], "duplicate");
}

#[tokio::test]
async fn event_is_forwarded_again_after_retention() {
    let env = TestEnv::builder().retention(Duration::from_secs(600)).build();
    let payload = EventBuilder::new().event_id("evt_expiring").build();

    post_event(router_for(&env), &payload).await;
    env.clock.advance(Duration::from_secs(599));
    let within = post_event(router_for(&env), &payload).await;
    env.clock.advance(Duration::from_secs(1));
    let after = post_event(router_for(&env), &payload).await;

    assert_eq!(within.status, StatusCode::OK);
    assert_eq!(after.status, StatusCode::ACCEPTED);
    assert_eq!(env.downstream.call_count(), 2);
}

#[tokio::test]
async fn unauthorized_downstream_fails_after_one_attempt() {
    let env = TestEnv::builder().downstream(ScriptedDownstream::always(401)).build();

    let response = post_event(router_for(&env), &valid_payload()).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["status"], "failed");
    assert_eq!(response.body["error"], "upstream_error");
    assert_eq!(response.body["upstream_error"], "unauthorized");
    assert_eq!(response.body["external_status"], 401);
    assert_eq!(response.body["attempts"], 1);
    assert_eq!(env.downstream.call_count(), 1);
}

#[tokio::test]
async fn server_error_then_success_takes_two_attempts() {
    let env = TestEnv::builder().downstream(ScriptedDownstream::statuses([500])).build();

    let response = post_event(router_for(&env), &valid_payload()).await;

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body["attempts"], 2);
    assert_eq!(env.clock.total_slept(), Duration::from_secs(1));
}

#[tokio::test]
async fn rate_limited_until_exhausted() {
    let env = TestEnv::builder().downstream(ScriptedDownstream::always(429)).build();

    let response = post_event(router_for(&env), &valid_payload()).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["upstream_error"], "rate_limited");
    assert_eq!(response.body["attempts"], 3);
    assert_eq!(env.clock.total_slept(), Duration::from_secs(3));
}

#[tokio::test]
async fn network_errors_report_network_status() {
    let env = TestEnv::builder()
        .downstream(ScriptedDownstream::with_fallback([], ScriptedReply::NetworkError))
        .build();

    let response = post_event(router_for(&env), &valid_payload()).await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["external_status"], "NETWORK_ERROR");
    assert_eq!(response.body["upstream_error"], "network_error");
    assert_eq!(response.body["attempts"], 3);
}
