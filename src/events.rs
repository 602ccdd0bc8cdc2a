//! Telemetry seam.
//!
//! Business logic only ever calls [`EventSink::emit`]; where the events go
//! (log pipeline, metrics bridge, message bus) is the embedder's concern.
//! Emission is best-effort: sink failures must never affect pool
//! correctness, so the interface is infallible and implementations swallow
//! their own errors.

use serde_json::Value;

/// Event severity, coarse on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Best-effort structured telemetry sink.
pub trait EventSink: Send + Sync {
    /// Emit one event for `pool` with a structured payload.
    fn emit(&self, event: &str, pool: &str, payload: Value, severity: Severity);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &str, _pool: &str, _payload: Value, _severity: Severity) {}
}
