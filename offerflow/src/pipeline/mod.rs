//! Pipeline building and execution.
//!
//! This module provides:
//! - Retry policies applied around a node's `compute` phase
//! - A builder that connects nodes by action label
//! - Synchronous and async runners that walk the resulting state machine

mod async_flow;
mod builder;
mod flow;
mod graph;
pub(crate) mod retry;

#[cfg(test)]
mod integration_tests;

pub use async_flow::AsyncPipeline;
pub use builder::{AsyncPipelineBuilder, PipelineBuilder};
pub use flow::Pipeline;
pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};
