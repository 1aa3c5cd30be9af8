//! HTTP client for the downstream conversions API.
//!
//! Handles request construction, response body capture, and error
//! categorization. Status classification is left to the dispatcher.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use beacon_core::NormalizedEvent;
use bytes::Bytes;
use reqwest::Response;
use serde_json::Value;
use tracing::{info_span, Instrument};

use crate::{
    downstream::{Downstream, DownstreamResponse},
    error::{DeliveryError, Result},
};

/// Default conversions endpoint.
pub const DEFAULT_DOWNSTREAM_URL: &str = "https://api.adeventsx.example/v1/conversions";

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;

/// Configuration for the downstream HTTP client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Conversions endpoint the events are posted to.
    pub url: String,
    /// Value of the `X-Api-Key` header.
    pub api_key: String,
    /// Timeout for a single HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DOWNSTREAM_URL.to_string(),
            api_key: "dummy-key".to_string(),
            timeout: Duration::from_secs(5),
            user_agent: concat!("Beacon-Gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Downstream backed by the real conversions API.
#[derive(Debug, Clone)]
pub struct HttpDownstream {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpDownstream {
    /// Creates a new HTTP downstream with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the URL is not a valid
    /// http(s) URL or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.url).map_err(|e| {
            DeliveryError::configuration(format!("invalid downstream URL {:?}: {e}", config.url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::configuration(format!(
                "downstream URL must be http or https, got {:?}",
                url.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new HTTP downstream with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn read_body(response: Response) -> Value {
        match response.bytes().await {
            Ok(bytes) => parse_body(&bytes),
            Err(e) => {
                tracing::warn!("Failed to read response body: {}", e);
                Value::Null
            },
        }
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn send(&self, event: &NormalizedEvent) -> Result<DownstreamResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!("downstream_send", event_id = %event.id, url = %self.config.url);

        async move {
            tracing::debug!("Sending event downstream");

            let result = self
                .client
                .post(&self.config.url)
                .header("X-Api-Key", &self.config.api_key)
                .header("X-Beacon-Event-Id", &event.id)
                .json(event)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "Request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(duration_millis(self.config.timeout)));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let status_code = response.status().as_u16();
            let body = Self::read_body(response).await;
            let duration = start_time.elapsed();

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "Received response"
            );

            Ok(DownstreamResponse { status_code, body, duration })
        }
        .instrument(span)
        .await
    }
}

/// Interprets a response body as JSON, falling back to a (possibly
/// truncated) JSON string.
fn parse_body(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }

    if let Ok(json) = serde_json::from_slice(bytes) {
        return json;
    }

    if bytes.len() > MAX_RESPONSE_BODY_SIZE {
        let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
        Value::String(format!("{truncated}... (truncated)"))
    } else {
        Value::String(String::from_utf8_lossy(bytes).into_owned())
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
