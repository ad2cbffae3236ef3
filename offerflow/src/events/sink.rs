//! Event sink trait and implementations.

use super::FlowEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Receives pipeline lifecycle events.
///
/// Synchronous pipelines call [`try_emit`](Self::try_emit); asynchronous
/// pipelines await [`emit`](Self::emit). Neither may fail the run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "node.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking. Errors are logged, never raised.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// Convenience for emitting a [`FlowEvent`] through any sink.
pub(crate) fn emit_now(sink: &dyn EventSink, event: FlowEvent) {
    let event_type = event.event_type.clone();
    sink.try_emit(&event_type, Some(event.into_payload()));
}

/// Awaiting counterpart of [`emit_now`].
pub(crate) async fn emit_event(sink: &dyn EventSink, event: FlowEvent) {
    let event_type = event.event_type.clone();
    sink.emit(&event_type, Some(event.into_payload())).await;
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that forwards events to `tracing`.
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
    /// Creates a logging sink at the given level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&serde_json::Value>) {
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = ?data, "event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = ?data, "event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log_event(event_type, data.as_ref());
    }
}
