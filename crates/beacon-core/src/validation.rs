//! Schema validation for inbound conversion event payloads.
//!
//! Every check runs independently so a caller receives the complete list of
//! violations in one response.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;

const STRING_FIELDS: [&str; 2] = ["event_id", "user_id"];
const EVENT_NAMES: [&str; 2] = ["purchase", "lead"];

/// Date-time layouts carrying an explicit offset, `+hh:mm` or `+hhmm`.
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M%z"];

/// Date-time layouts without an offset, taken as UTC.
const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%MZ",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Human-readable description, returned to callers verbatim.
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Validates a raw event payload.
///
/// Returns an empty list when the payload may proceed. A payload that is not
/// a JSON object reports every field.
pub fn validate(payload: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for field in STRING_FIELDS {
        if non_empty_str(payload, field).is_none() {
            errors.push(FieldError::new(field, format!("{field} must be a string")));
        }
    }

    let event_name = non_empty_str(payload, "event_name");
    if !event_name.is_some_and(|name| EVENT_NAMES.contains(&name)) {
        errors.push(FieldError::new("event_name", r#"event_name must be "purchase" or "lead""#));
    }

    let event_time = payload.get("event_time");
    if non_empty_str(payload, "event_time").is_none() {
        errors.push(FieldError::new("event_time", "event_time must be an ISO-8601 string"));
    }

    if !payload.get("value").is_some_and(Value::is_number) {
        errors.push(FieldError::new("value", "value must be a number"));
    }

    if non_empty_str(payload, "campaign_id").is_none() {
        errors.push(FieldError::new("campaign_id", "campaign_id must be a string"));
    }

    // Numbers and booleans are reported as mistyped but still denote an
    // instant; strings, arrays, and objects must parse.
    if let Some(time) = event_time.filter(|time| is_truthy(time)) {
        let unparseable = match time {
            Value::String(s) => parse_event_time(s).is_none(),
            Value::Array(_) | Value::Object(_) => true,
            Value::Null | Value::Bool(_) | Value::Number(_) => false,
        };
        if unparseable {
            errors.push(FieldError::new(
                "event_time",
                "event_time must be a valid ISO-8601 date string",
            ));
        }
    }

    errors
}

/// Parses an event timestamp.
///
/// Accepts RFC 3339 with any offset, ISO-8601 date-times with or without
/// seconds and with colon-less offsets, a naive date-time taken as UTC, and a
/// bare date taken as midnight UTC.
pub fn parse_event_time(input: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(input, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn non_empty_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
