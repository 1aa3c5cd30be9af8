//! Mock conversions API for exercising the real HTTP downstream.

use std::time::Duration;

use beacon_delivery::ClientConfig;
use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Path the mock API listens on.
pub const CONVERSIONS_PATH: &str = "/v1/conversions";

/// Test API key the mock expects.
pub const TEST_API_KEY: &str = "test-api-key";

/// Wiremock server standing in for the conversions API.
pub struct MockConversionsApi {
    server: MockServer,
}

impl MockConversionsApi {
    /// Starts a new mock API on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Full URL of the conversions endpoint.
    pub fn url(&self) -> String {
        format!("{}{CONVERSIONS_PATH}", self.server.uri())
    }

    /// Client configuration pointing at this mock.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url(),
            api_key: TEST_API_KEY.to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Answers the next `times` requests with `status` and `body`.
    ///
    /// Mounted responses are consumed in mount order.
    pub async fn respond_times(&self, status: u16, body: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path(CONVERSIONS_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answers every remaining request with `status` and `body`.
    pub async fn respond_always(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(CONVERSIONS_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answers every remaining request after `delay`.
    pub async fn respond_slowly(&self, status: u16, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(CONVERSIONS_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Bodies of every request received so far, parsed as JSON.
    pub async fn received_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }
}
