//! Conversion of validated events into the downstream wire format.
//!
//! Monetary values are rounded to the nearest cent, half away from zero,
//! using the shortest decimal representation of the submitted number. A
//! caller sending `19.995` means 19.995, not the nearest binary double
//! `19.99499999...`, so the result is 2000 cents.

use chrono::{DateTime, Utc};

use crate::models::{NormalizedEvent, RawEvent, EVENT_SOURCE};

/// Transforms a validated event into its normalized form.
pub fn transform(event: &RawEvent) -> NormalizedEvent {
    NormalizedEvent {
        id: event.event_id.clone(),
        user: event.user_id.clone(),
        name: event.event_name,
        ts: epoch_seconds(&event.event_time),
        value_cents: to_cents(event.value),
        campaign: event.campaign_id.clone(),
        source: EVENT_SOURCE.to_string(),
    }
}

/// Whole seconds since the Unix epoch, floored.
pub fn epoch_seconds(time: &DateTime<Utc>) -> i64 {
    // chrono keeps sub-second nanos non-negative, so this is a floor.
    time.timestamp()
}

/// Converts a currency amount to integer cents.
///
/// Saturates at the `i64` range; non-finite input yields zero.
pub fn to_cents(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }

    let repr = value.abs().to_string();
    let (whole, fraction) = repr.split_once('.').unwrap_or((repr.as_str(), ""));

    let mut digits = fraction.bytes().map(|b| i128::from(b - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = digits.next().is_some_and(|thousandths| thousandths >= 5);

    let magnitude = whole
        .parse::<i128>()
        .ok()
        .and_then(|w| w.checked_mul(100))
        .and_then(|cents| cents.checked_add(tenths * 10 + hundredths + i128::from(round_up)))
        .unwrap_or(i128::MAX);

    let signed = if value.is_sign_negative() { -magnitude } else { magnitude };
    i64::try_from(signed).unwrap_or(if signed < 0 { i64::MIN } else { i64::MAX })
}
