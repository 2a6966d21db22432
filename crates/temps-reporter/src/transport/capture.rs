use std::sync::Mutex;

use crate::envelope::Envelope;
use crate::event::Event;

use super::{DiscardCounter, Transport};

/// In-memory transport that records everything it is handed.
///
/// Never performs I/O, so delivery is synchronous and observable.
#[derive(Debug, Default)]
pub struct CaptureTransport {
    events: Mutex<Vec<Event>>,
    envelopes: Mutex<Vec<Envelope>>,
    discards: DiscardCounter,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured events in send order
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_event(&self) -> Option<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Empties the event and envelope buffers.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl Transport for CaptureTransport {
    fn send_event(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn send_envelope(&self, envelope: Envelope) {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope);
    }

    fn discard_counter(&self) -> &DiscardCounter {
        &self.discards
    }
}
