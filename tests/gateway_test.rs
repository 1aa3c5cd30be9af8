//! End-to-end gateway tests.
//!
//! Builds the service from configuration exactly as the binary does, then
//! drives it through the router. Time runs on a test clock so backoff and
//! retention windows elapse instantly.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use beacon_api::{create_router, AppState, Config};
use beacon_core::TestClock;
use beacon_delivery::DownstreamMode;
use beacon_testing::{http::TEST_API_KEY, EventBuilder, MockConversionsApi};
use serde_json::{json, Value};
use tower::ServiceExt;

fn http_config(api: &MockConversionsApi) -> Config {
    Config {
        downstream_mode: DownstreamMode::Http,
        downstream_url: api.url(),
        downstream_api_key: TEST_API_KEY.to_string(),
        ..Config::default()
    }
}

fn build_app(config: &Config, clock: &TestClock) -> (Router, AppState) {
    let state = AppState::from_config(config, Arc::new(clock.clone())).expect("valid configuration");
    (create_router(state.clone(), config.request_timeout()), state)
}

async fn post_event(app: &Router, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = app.clone().oneshot(request).await.expect("request should complete");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn http_mode_forwards_normalized_event() {
    let api = MockConversionsApi::start().await;
    api.respond_always(202, json!({"status": "accepted"})).await;
    let clock = TestClock::new();
    let (app, _) = build_app(&http_config(&api), &clock);

    let payload = EventBuilder::new()
        .event_id("evt_e2e")
        .user_id("user_7")
        .event_name("purchase")
        .field("event_time", json!("2024-01-01T00:00:00.999Z"))
        .value(19.995)
        .campaign_id("cmp_summer")
        .build();

    let (status, body) = post_event(&app, &payload).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["external_status"], 202);
    assert_eq!(
        api.received_bodies().await,
        vec![json!({
            "id": "evt_e2e",
            "user": "user_7",
            "name": "purchase",
            "ts": 1_704_067_200,
            "value_cents": 2000,
            "campaign": "cmp_summer",
            "source": "internal_martech",
        })]
    );
}

#[tokio::test]
async fn http_mode_retries_then_reports_upstream_failure() {
    let api = MockConversionsApi::start().await;
    api.respond_always(500, json!({"error": "boom"})).await;
    let clock = TestClock::new();
    let (app, _) = build_app(&http_config(&api), &clock);

    let (status, body) = post_event(&app, &EventBuilder::new().build()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["attempts"], 3);
    assert_eq!(body["external_status"], 500);
    assert_eq!(body["upstream_error"], "upstream_error");
    assert_eq!(api.request_count().await, 3);
    assert_eq!(clock.total_slept(), Duration::from_secs(3));
}

#[tokio::test]
async fn duplicates_are_suppressed_until_retention_expires() {
    let api = MockConversionsApi::start().await;
    api.respond_always(202, json!({})).await;
    let clock = TestClock::new();
    let config = Config { idempotency_retention_seconds: 60, ..http_config(&api) };
    let (app, state) = build_app(&config, &clock);
    let payload = EventBuilder::new().event_id("evt_window").build();

    let (first, _) = post_event(&app, &payload).await;
    let (second, body) = post_event(&app, &payload).await;
    clock.advance(Duration::from_secs(60));
    assert_eq!(state.cache.sweep(), 1);
    let (third, _) = post_event(&app, &payload).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["message"], "Event already processed within 1 minute");
    assert_eq!(third, StatusCode::ACCEPTED);
    assert_eq!(api.request_count().await, 2);
}

#[tokio::test]
async fn concurrent_duplicates_are_each_answered() {
    let api = MockConversionsApi::start().await;
    api.respond_always(202, json!({})).await;
    let clock = TestClock::new();
    let (app, _) = build_app(&http_config(&api), &clock);
    let payload = EventBuilder::new().event_id("evt_race").build();

    let (a, b) = tokio::join!(post_event(&app, &payload), post_event(&app, &payload));

    for status in [a.0, b.0] {
        assert!(status == StatusCode::ACCEPTED || status == StatusCode::OK, "got {status}");
    }
    assert!(api.request_count().await >= 1);
}

#[tokio::test]
async fn simulated_mode_answers_with_consistent_outcomes() {
    let clock = TestClock::new();
    let (app, _) = build_app(&Config::default(), &clock);

    for _ in 0..20 {
        let (status, body) = post_event(&app, &EventBuilder::new().build()).await;

        let attempts = body["attempts"].as_u64().expect("attempts present");
        assert!((1..=3).contains(&attempts));
        match status {
            StatusCode::ACCEPTED => {
                assert_eq!(body["status"], "accepted");
                assert_eq!(body["external_status"], 202);
            },
            StatusCode::BAD_GATEWAY => {
                assert_eq!(body["status"], "failed");
                assert!(body["upstream_error"].is_string());
            },
            other => panic!("unexpected status {other}: {body}"),
        }
    }
}

#[tokio::test]
async fn health_reports_http_mode() {
    let api = MockConversionsApi::start().await;
    let clock = TestClock::new();
    let (app, _) = build_app(&http_config(&api), &clock);

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(body["downstream_mode"], "http");
    assert_eq!(body["cache_entries"], 0);
}
