#![no_main]

//! Fuzz target for inbound event payloads.
//!
//! Feeds arbitrary bytes through the same path as the ingestion handler:
//! parse (falling back to null), validate, and normalize whatever passes.
//! Validation must never panic, and every payload it accepts must extract
//! and transform.

use beacon_core::{transform, validate, RawEvent};
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let payload: Value = serde_json::from_slice(data).unwrap_or(Value::Null);

    let errors = validate(&payload);
    if !errors.is_empty() {
        return;
    }

    let raw = RawEvent::from_payload(&payload).expect("validated payload must extract");
    let normalized = transform(&raw);
    assert_eq!(normalized.id, raw.event_id);
    let _ = serde_json::to_vec(&normalized);
});
