//! Recording event sink.

use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{EventSink, Severity};

/// One captured emission.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: String,
    pub pool: String,
    pub payload: Value,
    pub severity: Severity,
}

/// Sink that records every emission for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in emission order.
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// How many times `event` was emitted.
    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.event == event).count()
    }

    /// The most recent emission of `event`.
    pub fn last(&self, event: &str) -> Option<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.event == event)
            .cloned()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, pool: &str, payload: Value, severity: Severity) {
        self.events.lock().push(RecordedEvent {
            event: event.to_string(),
            pool: pool.to_string(),
            payload,
            severity,
        });
    }
}
