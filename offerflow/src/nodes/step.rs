//! Type-erased steps that a pipeline can hold and run.

use crate::context::Context;
use crate::core::Action;
use crate::errors::FlowResult;
use async_trait::async_trait;
use std::fmt::Debug;

/// Anything with a display name used in logs, events and errors.
pub trait Named {
    /// Returns the name of the step.
    fn name(&self) -> &str;
}

/// A step a synchronous [`Pipeline`](crate::pipeline::Pipeline) can run.
///
/// Implemented by the node wrappers and by pipelines themselves, so a whole
/// pipeline can be nested as one step of a larger one.
pub trait Step: Named + Send + Sync + Debug {
    /// Runs the step against the shared context and returns the chosen action.
    fn run(&self, ctx: &mut Context) -> FlowResult<Action>;
}

/// A step an [`AsyncPipeline`](crate::pipeline::AsyncPipeline) can await.
#[async_trait]
pub trait AsyncStep: Named + Send + Sync + Debug {
    /// Runs the step against the shared context and returns the chosen action.
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action>;
}
