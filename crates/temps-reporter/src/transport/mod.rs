//! Event delivery backends
//!
//! Every backend implements [`Transport`]. Delivery never raises to the
//! capturing caller: anything that is not delivered is counted in a
//! [`DiscardCounter`] keyed by reason and event type.

mod capture;
mod http;
mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;

use crate::envelope::{ClientReport, DiscardedEvent, Envelope};
use crate::event::Event;

pub use capture::CaptureTransport;
pub use http::{HttpTransport, RetryPolicy};
pub use worker::BackgroundWorker;

/// Why an event was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiscardReason {
    /// Rejected by the sampling draw
    Sampled,
    /// Current environment is not enabled
    Environment,
    /// Dropped by the `before_send` hook
    BeforeSend,
    /// Delivery failed after all retries
    SendError,
    /// Server asked the client to back off
    RateLimitBackoff,
    /// Background queue was full
    QueueOverflow,
    /// Still pending when shutdown timed out
    Shutdown,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Sampled => "sampled",
            DiscardReason::Environment => "environment",
            DiscardReason::BeforeSend => "before_send",
            DiscardReason::SendError => "send_error",
            DiscardReason::RateLimitBackoff => "ratelimit_backoff",
            DiscardReason::QueueOverflow => "queue_overflow",
            DiscardReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counts of events dropped before send, keyed by `(reason, event type)`.
#[derive(Debug, Default)]
pub struct DiscardCounter {
    counts: Mutex<HashMap<(DiscardReason, String), u64>>,
}

impl DiscardCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reason: DiscardReason, ty: &str) {
        self.record_many(reason, ty, 1);
    }

    pub fn record_many(&self, reason: DiscardReason, ty: &str, quantity: u64) {
        if quantity == 0 {
            return;
        }
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        *counts.entry((reason, ty.to_string())).or_insert(0) += quantity;
    }

    pub fn get(&self, reason: DiscardReason, ty: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts
            .get(&(reason, ty.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<(DiscardReason, String), u64> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Current counts as a client report, `None` if nothing was dropped.
    pub fn report(&self) -> Option<ClientReport> {
        let counts = self.snapshot();
        if counts.is_empty() {
            return None;
        }
        let mut discarded_events: Vec<DiscardedEvent> = counts
            .into_iter()
            .map(|((reason, category), quantity)| DiscardedEvent {
                reason: reason.as_str().to_string(),
                category,
                quantity,
            })
            .collect();
        discarded_events.sort_by(|a, b| (&a.reason, &a.category).cmp(&(&b.reason, &b.category)));
        Some(ClientReport {
            timestamp: Utc::now(),
            discarded_events,
        })
    }
}

/// Delivery backend used by a [`Client`](crate::Client).
pub trait Transport: Send + Sync {
    /// Hands an event over for delivery. Defaults to wrapping it in an envelope.
    fn send_event(&self, event: Event) {
        self.send_envelope(Envelope::from_event(event));
    }

    fn send_envelope(&self, envelope: Envelope);

    /// Waits until pending deliveries finish. Returns `false` on timeout.
    fn flush(&self, _timeout: Duration) -> bool {
        true
    }

    /// Drains pending deliveries and stops accepting new ones. Anything
    /// still pending at the deadline is discarded and counted.
    fn shutdown(&self, timeout: Duration) -> bool {
        self.flush(timeout)
    }

    fn discard_counter(&self) -> &DiscardCounter;

    fn record_lost_event(&self, reason: DiscardReason, ty: &str) {
        self.discard_counter().record(reason, ty);
    }

    fn discarded_events(&self) -> HashMap<(DiscardReason, String), u64> {
        self.discard_counter().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_per_reason_and_type() {
        let counter = DiscardCounter::new();
        counter.record(DiscardReason::Sampled, "event");
        counter.record(DiscardReason::Sampled, "event");
        counter.record(DiscardReason::SendError, "event");

        assert_eq!(counter.get(DiscardReason::Sampled, "event"), 2);
        assert_eq!(counter.get(DiscardReason::SendError, "event"), 1);
        assert_eq!(counter.get(DiscardReason::Environment, "event"), 0);
    }

    #[test]
    fn test_report_lists_counts_sorted() {
        let counter = DiscardCounter::new();
        assert!(counter.report().is_none());

        counter.record_many(DiscardReason::QueueOverflow, "event", 4);
        counter.record(DiscardReason::Environment, "event");

        let report = counter.report().unwrap();
        assert_eq!(report.discarded_events.len(), 2);
        assert_eq!(report.discarded_events[0].reason, "environment");
        assert_eq!(report.discarded_events[1].reason, "queue_overflow");
        assert_eq!(report.discarded_events[1].quantity, 4);
        assert_eq!(counter.snapshot().len(), 2);
    }
}
