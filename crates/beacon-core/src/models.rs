//! Conversion event models and gateway identifiers.
//!
//! Defines the inbound event as accepted from callers, the normalized event
//! sent downstream, the upstream status/error classification shared by the
//! delivery and API crates, and the per-request identifier.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
    error::{CoreError, Result},
    validation::parse_event_time,
};

/// Origin tag stamped on every normalized event.
pub const EVENT_SOURCE: &str = "internal_martech";

/// Kind of conversion being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    /// Completed purchase.
    Purchase,
    /// Captured lead.
    Lead,
}

impl EventName {
    /// Returns the wire name of the event.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Lead => "lead",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "lead" => Ok(Self::Lead),
            other => Err(CoreError::invalid_field(
                "event_name",
                format!("unknown event name {other:?}"),
            )),
        }
    }
}

/// Conversion event as submitted by a caller.
///
/// Only constructed from a payload that has already passed
/// [`validate`](crate::validation::validate); `event_time` is stored parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Caller-assigned identifier, used as the idempotency key.
    pub event_id: String,
    /// Identifier of the converting user.
    pub user_id: String,
    /// Conversion kind.
    pub event_name: EventName,
    /// When the conversion happened.
    pub event_time: DateTime<Utc>,
    /// Conversion value in currency units.
    pub value: f64,
    /// Campaign the conversion is attributed to.
    pub campaign_id: String,
}

impl RawEvent {
    /// Extracts a typed event from a validated JSON payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if a field is missing or mistyped, which only
    /// happens when validation was skipped.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let event_time = required_str(payload, "event_time")?;
        let event_time = parse_event_time(event_time).ok_or_else(|| {
            CoreError::invalid_field("event_time", format!("unparseable date-time {event_time:?}"))
        })?;

        let value = payload
            .get("value")
            .ok_or(CoreError::MissingField("value"))?
            .as_f64()
            .ok_or_else(|| CoreError::invalid_field("value", "not a number"))?;

        Ok(Self {
            event_id: required_str(payload, "event_id")?.to_string(),
            user_id: required_str(payload, "user_id")?.to_string(),
            event_name: required_str(payload, "event_name")?.parse()?,
            event_time,
            value,
            campaign_id: required_str(payload, "campaign_id")?.to_string(),
        })
    }
}

fn required_str<'a>(payload: &'a Value, field: &'static str) -> Result<&'a str> {
    payload
        .get(field)
        .ok_or(CoreError::MissingField(field))?
        .as_str()
        .ok_or_else(|| CoreError::invalid_field(field, "not a string"))
}

/// Event in the downstream conversions API wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Source event id.
    pub id: String,
    /// Source user id.
    pub user: String,
    /// Conversion kind.
    pub name: EventName,
    /// Event time as whole epoch seconds.
    pub ts: i64,
    /// Conversion value in integer cents.
    pub value_cents: i64,
    /// Source campaign id.
    pub campaign: String,
    /// Origin system tag.
    pub source: String,
}

/// Last status observed from the downstream API.
///
/// Serialized as the bare HTTP status number, or the string
/// `"NETWORK_ERROR"` when no response was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamStatus {
    /// An HTTP response with this status code.
    Http(u16),
    /// Transport failure or per-attempt timeout.
    NetworkError,
}

impl UpstreamStatus {
    const NETWORK_ERROR: &'static str = "NETWORK_ERROR";
}

impl fmt::Display for UpstreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(status) => write!(f, "{status}"),
            Self::NetworkError => f.write_str(Self::NETWORK_ERROR),
        }
    }
}

impl Serialize for UpstreamStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Http(status) => serializer.serialize_u16(*status),
            Self::NetworkError => serializer.serialize_str(Self::NETWORK_ERROR),
        }
    }
}

impl<'de> Deserialize<'de> for UpstreamStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Status(u16),
            Marker(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Status(status) => Ok(Self::Http(status)),
            Repr::Marker(marker) if marker == Self::NETWORK_ERROR => Ok(Self::NetworkError),
            Repr::Marker(other) => {
                Err(serde::de::Error::custom(format!("unknown upstream status {other:?}")))
            },
        }
    }
}

/// Classified downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorCode {
    /// HTTP 400: downstream rejected the payload.
    InvalidPayload,
    /// HTTP 401 or 403: credentials rejected.
    Unauthorized,
    /// HTTP 429: downstream is throttling.
    RateLimited,
    /// HTTP 5xx: downstream failed internally.
    UpstreamError,
    /// No response: connection failure or attempt timeout.
    NetworkError,
    /// Any status outside the documented contract.
    UnexpectedStatus,
}

impl UpstreamErrorCode {
    /// Classifies a non-success HTTP status.
    pub const fn for_status(status: u16) -> Self {
        match status {
            400 => Self::InvalidPayload,
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            500..=u16::MAX => Self::UpstreamError,
            _ => Self::UnexpectedStatus,
        }
    }

    /// Returns the wire name of the code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPayload => "invalid_payload",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::UpstreamError => "upstream_error",
            Self::NetworkError => "network_error",
            Self::UnexpectedStatus => "unexpected_status",
        }
    }

    /// Returns whether failures of this class are worth retrying.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::UpstreamError | Self::NetworkError)
    }
}

impl fmt::Display for UpstreamErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier assigned to every inbound request.
///
/// Formatted as `req_<unix millis>_<9 base-36 chars>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    const ALPHABET: &'static [u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    const SUFFIX_LEN: usize = 9;

    /// Generates a request id stamped with the given time.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..Self::SUFFIX_LEN)
            .map(|_| char::from(Self::ALPHABET[rng.random_range(0..Self::ALPHABET.len())]))
            .collect();

        Self(format!("req_{}_{suffix}", now.timestamp_millis()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
