//! Lifecycle events for pipeline observability.
//!
//! Pipelines report every run and node transition to an [`EventSink`]. The
//! default sink discards events; [`LoggingEventSink`] forwards them to
//! `tracing`.

mod event;
mod sink;

pub use event::{
    FlowEvent, NODE_COMPLETED, NODE_FAILED, NODE_STARTED, PIPELINE_COMPLETED, PIPELINE_FAILED,
    PIPELINE_STARTED,
};
#[cfg(test)]
pub use sink::MockEventSink;
pub use sink::{EventSink, LoggingEventSink, NoOpEventSink};
pub(crate) use sink::{emit_event, emit_now};
