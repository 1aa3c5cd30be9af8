//! Shared helpers for API integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use beacon_api::{create_router, AppState};
use beacon_delivery::DownstreamMode;
use beacon_testing::TestEnv;
use serde_json::Value;
use tower::ServiceExt;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds application state over the test environment's components.
pub fn state_for(env: &TestEnv) -> AppState {
    AppState::new(
        Arc::clone(&env.cache),
        Arc::clone(&env.dispatcher),
        Arc::new(env.clock.clone()),
        DownstreamMode::Simulated,
    )
}

pub fn router_for(env: &TestEnv) -> Router {
    create_router(state_for(env), REQUEST_TIMEOUT)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub request_id: Option<String>,
    pub body: Value,
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.expect("request should complete");

    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    TestResponse { status, request_id, body }
}

pub async fn post_event(app: Router, payload: &Value) -> TestResponse {
    post_raw(app, payload.to_string()).await
}

pub async fn post_raw(app: Router, body: impl Into<Body>) -> TestResponse {
    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();

    send(app, request).await
}

pub async fn get(app: Router, uri: &str) -> TestResponse {
    let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}
