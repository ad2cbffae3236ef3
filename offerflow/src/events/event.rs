//! Lifecycle events emitted while a pipeline runs.

use crate::core::{Action, NodeId, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Emitted once when a run begins.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Emitted once when a run ends without error.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// Emitted once when a run aborts.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// Emitted before each node runs.
pub const NODE_STARTED: &str = "node.started";
/// Emitted after a node returned an action.
pub const NODE_COMPLETED: &str = "node.completed";
/// Emitted when a node returned an error.
pub const NODE_FAILED: &str = "node.failed";

/// An event describing one step of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// The event type, one of the constants in this module.
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl FlowEvent {
    /// Creates an event scoped to one pipeline run.
    #[must_use]
    pub fn new(event_type: impl Into<String>, pipeline: &str, run_id: RunId) -> Self {
        let mut data = Map::new();
        data.insert("pipeline".into(), json!(pipeline));
        data.insert("run_id".into(), json!(run_id.to_string()));
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Adds a payload field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Attaches the node name and id.
    #[must_use]
    pub fn for_node(self, id: NodeId, name: &str) -> Self {
        self.with("node", name).with("node_id", id.index())
    }

    /// Attaches the action a node or pipeline returned.
    #[must_use]
    pub fn with_action(self, action: &Action) -> Self {
        self.with("action", action.as_str())
    }

    /// Attaches a duration in milliseconds.
    #[must_use]
    pub fn with_duration_ms(self, duration_ms: f64) -> Self {
        self.with("duration_ms", duration_ms)
    }

    /// Attaches an error message.
    #[must_use]
    pub fn with_error(self, error: &impl std::fmt::Display) -> Self {
        self.with("error", error.to_string())
    }

    /// Returns the payload handed to an [`EventSink`](super::EventSink),
    /// with the timestamp folded in.
    #[must_use]
    pub fn into_payload(self) -> Value {
        let mut data = self.data;
        data.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        Value::Object(data)
    }
}
