//! Scripted downstream double.
//!
//! Replies are consumed in order; once the script runs out, every further
//! call gets the fallback reply. All received events are recorded.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use beacon_core::NormalizedEvent;
use beacon_delivery::{DeliveryError, Downstream, DownstreamResponse, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond with a status and a body derived from it.
    Status(u16),
    /// Respond with a status and an explicit body.
    Json(u16, Value),
    /// Fail without a response.
    NetworkError,
    /// Never answer; relies on the caller's attempt timeout.
    Hang,
}

impl ScriptedReply {
    fn default_body(status: u16) -> Value {
        match status {
            200..=299 => json!({"status": "accepted"}),
            429 => json!({"error": "rate_limited", "retry_after": 2}),
            other => json!({"error": format!("http_{other}")}),
        }
    }
}

/// Downstream that answers from a fixed script.
#[derive(Debug)]
pub struct ScriptedDownstream {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    received: Mutex<Vec<NormalizedEvent>>,
    calls: AtomicU32,
}

impl ScriptedDownstream {
    /// Creates a downstream that plays `replies`, then answers 202.
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self::with_fallback(replies, ScriptedReply::Status(202))
    }

    /// Creates a downstream that plays `replies`, then answers `fallback`.
    pub fn with_fallback(
        replies: impl IntoIterator<Item = ScriptedReply>,
        fallback: ScriptedReply,
    ) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            fallback,
            received: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Creates a downstream that always answers `status`.
    pub fn always(status: u16) -> Self {
        Self::with_fallback([], ScriptedReply::Status(status))
    }

    /// Creates a downstream that plays the given statuses, then answers 202.
    pub fn statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::new(statuses.into_iter().map(ScriptedReply::Status))
    }

    /// Number of `send` calls so far.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Events received so far, in call order.
    pub fn received(&self) -> Vec<NormalizedEvent> {
        self.received.lock().clone()
    }

    /// Appends replies to the end of the script.
    pub fn push(&self, replies: impl IntoIterator<Item = ScriptedReply>) {
        self.script.lock().extend(replies);
    }
}

#[async_trait]
impl Downstream for ScriptedDownstream {
    async fn send(&self, event: &NormalizedEvent) -> Result<DownstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().push(event.clone());

        let reply = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());

        match reply {
            ScriptedReply::Status(status_code) => Ok(DownstreamResponse {
                status_code,
                body: ScriptedReply::default_body(status_code),
                duration: Duration::ZERO,
            }),
            ScriptedReply::Json(status_code, body) => {
                Ok(DownstreamResponse { status_code, body, duration: Duration::ZERO })
            },
            ScriptedReply::NetworkError => Err(DeliveryError::network("scripted network failure")),
            ScriptedReply::Hang => {
                std::future::pending::<()>().await;
                Err(DeliveryError::internal("hung reply resumed"))
            },
        }
    }
}
