//! Downstream dispatch for normalized conversion events.
//!
//! This crate sends each accepted event to the conversions API, classifies
//! the answer, and retries transient failures inline with exponential
//! backoff before reporting a single terminal outcome.
//!
//! # Architecture
//!
//! The [`Dispatcher`] owns the attempt loop and talks to the API through the
//! [`Downstream`] trait:
//!
//! 1. **Send** - one attempt, bounded by a per-attempt timeout
//! 2. **Classify** - 2xx succeeds; 429, 5xx and network errors are retryable;
//!    everything else is terminal
//! 3. **Backoff** - wait `base * 2^(n-1)` on the injected clock, then retry
//! 4. **Report** - a [`DispatchOutcome`] with the last status and attempt count
//!
//! Two downstreams are provided: [`HttpDownstream`] for the real API and
//! [`SimulatedDownstream`], which fabricates responses from a probability
//! table.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use beacon_core::{NormalizedEvent, RealClock};
//! use beacon_delivery::{Dispatcher, DispatcherConfig, HttpDownstream};
//!
//! # async fn example(event: NormalizedEvent) -> beacon_delivery::Result<()> {
//! let downstream = Arc::new(HttpDownstream::with_defaults()?);
//! let dispatcher = Dispatcher::new(downstream, Arc::new(RealClock::new()), DispatcherConfig::default());
//!
//! let outcome = dispatcher.dispatch(&event).await;
//! println!("accepted: {} after {} attempt(s)", outcome.success, outcome.attempts);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod downstream;
pub mod error;
pub mod retry;
pub mod simulator;

pub use client::{ClientConfig, HttpDownstream, DEFAULT_DOWNSTREAM_URL};
pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig};
pub use downstream::{Downstream, DownstreamMode, DownstreamResponse};
pub use error::{DeliveryError, Result};
pub use retry::{RetryDecision, RetryPolicy};
pub use simulator::{ProbabilityTable, SimulatedDownstream, SimulatorConfig};
