//! Beacon HTTP API.
//!
//! Routes, middleware, configuration, and shared state for the conversion
//! event gateway.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::{create_router, shutdown_signal, start_server, with_middleware, REQUEST_ID_HEADER};
pub use state::AppState;
