//! Payload builders for inbound conversion events.

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde_json::{json, Map, Value};

/// Builder for inbound event payloads.
///
/// Starts from a valid payload; setters override or remove single fields so
/// tests can describe only what matters to them.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    fields: Map<String, Value>,
}

impl EventBuilder {
    /// Creates a builder for a valid purchase with a random event id.
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("event_id".into(), json!(unique_event_id()));
        fields.insert("user_id".into(), json!("user_42"));
        fields.insert("event_name".into(), json!("purchase"));
        fields.insert("event_time".into(), json!("2024-01-01T00:00:00Z"));
        fields.insert("value".into(), json!(19.99));
        fields.insert("campaign_id".into(), json!("cmp_spring"));
        Self { fields }
    }

    /// Sets the event id.
    #[must_use]
    pub fn event_id(self, id: impl Into<String>) -> Self {
        self.field("event_id", Value::String(id.into()))
    }

    /// Sets the user id.
    #[must_use]
    pub fn user_id(self, id: impl Into<String>) -> Self {
        self.field("user_id", Value::String(id.into()))
    }

    /// Sets the event name.
    #[must_use]
    pub fn event_name(self, name: impl Into<String>) -> Self {
        self.field("event_name", Value::String(name.into()))
    }

    /// Sets the event time from a timestamp.
    #[must_use]
    pub fn event_time(self, time: DateTime<Utc>) -> Self {
        self.field("event_time", json!(time.to_rfc3339_opts(SecondsFormat::Millis, true)))
    }

    /// Sets the value.
    #[must_use]
    pub fn value(self, value: f64) -> Self {
        self.field("value", json!(value))
    }

    /// Sets the campaign id.
    #[must_use]
    pub fn campaign_id(self, id: impl Into<String>) -> Self {
        self.field("campaign_id", Value::String(id.into()))
    }

    /// Sets any field to an arbitrary JSON value.
    #[must_use]
    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Removes a field.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    /// Returns the payload's event id, if it is a string.
    pub fn id(&self) -> Option<&str> {
        self.fields.get("event_id").and_then(Value::as_str)
    }

    /// Builds the payload.
    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Default for EventBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A valid purchase payload with a random event id.
pub fn valid_payload() -> Value {
    EventBuilder::new().build()
}

/// Random event id, unique enough for a test run.
pub fn unique_event_id() -> String {
    let suffix: u64 = rand::rng().random();
    format!("evt_{suffix:016x}")
}

#[cfg(test)]
mod tests {
    use beacon_core::validate;

    use super::*;

    #[test]
    fn default_payload_is_valid() {
        assert!(validate(&valid_payload()).is_empty());
    }

    #[test]
    fn builder_overrides_and_removes_fields() {
        let payload = EventBuilder::new().event_id("evt_fixed").value(0.0).without("user_id").build();

        assert_eq!(payload["event_id"], "evt_fixed");
        assert_eq!(payload["value"], 0.0);
        assert!(payload.get("user_id").is_none());
        assert_eq!(validate(&payload).len(), 1);
    }

    #[test]
    fn event_ids_differ() {
        assert_ne!(unique_event_id(), unique_event_id());
    }
}
