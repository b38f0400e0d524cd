//! Lifecycle event sinks.
//!
//! The reporter pushes `job.<status>` and `job.metrics` events through an
//! [`EventSink`]; what happens to them (logs, analytics, nothing) is the
//! sink's business.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event_type: &str, payload: serde_json::Value);

    /// Emits without awaiting. Must never fail or panic.
    fn try_emit(&self, event_type: &str, payload: serde_json::Value);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _payload: serde_json::Value) {}

    fn try_emit(&self, _event_type: &str, _payload: serde_json::Value) {}
}

/// Writes events to the `tracing` log.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (DEBUG or INFO).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    fn log(&self, event_type: &str, payload: &serde_json::Value) {
        let job_id = payload.get("job_id").and_then(serde_json::Value::as_str).unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(event_type, job_id, payload = %payload, "Job event");
        } else {
            info!(event_type, job_id, payload = %payload, "Job event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.log(event_type, &payload);
    }

    fn try_emit(&self, event_type: &str, payload: serde_json::Value) {
        self.log(event_type, &payload);
    }
}

/// Keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, serde_json::Value)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.read().clone()
    }

    /// Returns the events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, serde_json::Value)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the event types emitted for one job, in order.
    #[must_use]
    pub fn types_for_job(&self, job_id: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(_, p)| p.get("job_id").and_then(serde_json::Value::as_str) == Some(job_id))
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.try_emit(event_type, payload);
    }

    fn try_emit(&self, event_type: &str, payload: serde_json::Value) {
        self.events.write().push((event_type.to_string(), payload));
    }
}
