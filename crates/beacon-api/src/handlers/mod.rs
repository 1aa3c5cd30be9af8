//! HTTP request handlers.

pub mod events;
pub mod health;

pub use events::ingest_event;
pub use health::{health_check, liveness_check};
