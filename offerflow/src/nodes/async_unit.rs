//! Awaitable units and the [`AsyncNode`] wrapper.

use super::{AsyncStep, Named};
use crate::config::FlowConfig;
use crate::context::Context;
use crate::core::Action;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::retry::execute_with_retry_async;
use crate::pipeline::RetryPolicy;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::time::Duration;

/// The three-phase contract with awaitable phases.
///
/// Same rules as [`Unit`](super::Unit): only `finalize` sees the context
/// mutably and only `compute` is retried.
#[async_trait]
pub trait AsyncUnit: Send + Sync {
    /// Value handed from `prepare` to `compute` and `finalize`.
    type Prep: Send + Sync;
    /// Value produced by `compute` (or `fallback`).
    type Output: Send;

    /// Reads what the unit needs from the context.
    async fn prepare(&self, ctx: &Context) -> anyhow::Result<Self::Prep>;

    /// Does the work, typically awaiting a collaborator.
    async fn compute(&self, prep: &Self::Prep) -> anyhow::Result<Self::Output>;

    /// Produces a degraded result once every attempt failed.
    async fn fallback(
        &self,
        prep: &Self::Prep,
        error: anyhow::Error,
    ) -> anyhow::Result<Self::Output> {
        let _ = prep;
        Err(error)
    }

    /// Writes results into the context and selects the successor.
    async fn finalize(
        &self,
        ctx: &mut Context,
        prep: Self::Prep,
        output: Self::Output,
    ) -> anyhow::Result<Action> {
        let _ = (ctx, prep, output);
        Ok(Action::Default)
    }
}

/// Runs an [`AsyncUnit`] with a name and a retry policy.
pub struct AsyncNode<U> {
    name: String,
    unit: U,
    retry: RetryPolicy,
}

impl<U: AsyncUnit> AsyncNode<U> {
    /// Creates a node with a single-attempt policy.
    pub fn new(name: impl Into<String>, unit: U) -> Self {
        Self {
            name: name.into(),
            unit,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the total attempt budget for `compute`.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.retry = self.retry.with_max_attempts(attempts);
        self
    }

    /// Sets the wait between attempts.
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.retry = self.retry.with_wait(wait);
        self
    }

    /// Applies the node-level defaults of `config`.
    #[must_use]
    pub fn with_config(mut self, config: &FlowConfig) -> Self {
        self.retry = config.retry.clone();
        self
    }

    /// Returns the wrapped unit.
    pub fn unit(&self) -> &U {
        &self.unit
    }
}

impl<U> Debug for AsyncNode<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncNode")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<U> Named for AsyncNode<U> {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<U: AsyncUnit> AsyncStep for AsyncNode<U> {
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        tracing::debug!(node = %self.name, "prepare");
        let prep = self
            .unit
            .prepare(ctx)
            .await
            .map_err(|e| FlowError::prepare(&self.name, e))?;

        let output = execute_with_retry_async(
            &self.retry,
            &self.name,
            None,
            &prep,
            |p| self.unit.compute(p),
            |p, e| self.unit.fallback(p, e),
        )
        .await?;

        tracing::debug!(node = %self.name, "finalize");
        self.unit
            .finalize(ctx, prep, output)
            .await
            .map_err(|e| FlowError::finalize(&self.name, e))
    }
}
