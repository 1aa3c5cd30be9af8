//! The downstream conversions API as an abstract capability.
//!
//! The dispatcher only needs "send this event, tell me the status and body".
//! [`HttpDownstream`](crate::client::HttpDownstream) talks to the real API and
//! [`SimulatedDownstream`](crate::simulator::SimulatedDownstream) reproduces
//! its response contract locally.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use beacon_core::NormalizedEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeliveryError, Result};

/// Sends normalized events to a conversions API.
#[async_trait]
pub trait Downstream: Send + Sync + fmt::Debug {
    /// Sends one event and returns whatever the downstream answered.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` only when no response was received. Error
    /// statuses are returned as `Ok` and classified by the caller.
    async fn send(&self, event: &NormalizedEvent) -> Result<DownstreamResponse>;
}

/// Response from a single downstream attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body; non-JSON bodies are carried as a JSON string.
    pub body: Value,
    /// Time from sending the request to reading the body.
    pub duration: Duration,
}

impl DownstreamResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Which downstream implementation the gateway uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamMode {
    /// Local probability-table simulator.
    #[default]
    Simulated,
    /// Real HTTP conversions API.
    Http,
}

impl DownstreamMode {
    /// Returns the configuration name of the mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for DownstreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownstreamMode {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(Self::Simulated),
            "http" => Ok(Self::Http),
            other => Err(DeliveryError::configuration(format!(
                "unknown downstream mode {other:?}, expected \"simulated\" or \"http\""
            ))),
        }
    }
}
