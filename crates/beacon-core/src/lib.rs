//! Core domain models and event processing primitives.
//!
//! Provides the conversion event types, the error taxonomy, the clock
//! abstraction, and the three request-path components that run before an
//! event is handed to the delivery crate:
//!
//! 1. **Validation** - checks a raw JSON payload and collects every violation
//! 2. **Idempotency** - suppresses events whose id was seen recently
//! 3. **Transformation** - converts a validated event into the wire format
//!
//! All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod idempotency;
pub mod models;
pub mod time;
pub mod transform;
pub mod validation;

pub use error::{BeaconError, CoreError, Result};
pub use idempotency::{CacheConfig, IdempotencyCache, MIN_SWEEP_INTERVAL};
pub use models::{
    EventName, NormalizedEvent, RawEvent, RequestId, UpstreamErrorCode, UpstreamStatus,
    EVENT_SOURCE,
};
pub use time::{Clock, RealClock, TestClock};
pub use transform::transform;
pub use validation::{validate, FieldError};
