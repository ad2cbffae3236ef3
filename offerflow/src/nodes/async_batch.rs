//! Batch units whose items are computed concurrently.
//!
//! Item futures are polled together on the calling task through an ordered
//! buffered stream, so they interleave while waiting on I/O without any
//! extra threads. Results are aligned with the item order, not with the order
//! in which items finish.

use super::batch::{check_cardinality, flatten_results};
use super::{AsyncStep, Batched, Named};
use crate::config::FlowConfig;
use crate::context::Context;
use crate::core::Action;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::retry::execute_with_retry_async;
use crate::pipeline::RetryPolicy;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// The contract of a batch unit with awaitable phases.
#[async_trait]
pub trait AsyncBatchUnit: Send + Sync {
    /// One element of the prepared collection.
    type Item: Send + Sync;
    /// The result computed for one item.
    type Output: Send;

    /// Produces the ordered item collection. May be empty.
    async fn prepare(&self, ctx: &Context) -> anyhow::Result<Vec<Self::Item>>;

    /// Computes the result for a single item.
    async fn compute(&self, item: &Self::Item) -> anyhow::Result<Batched<Self::Output>>;

    /// Produces a degraded result for an item whose attempts all failed.
    async fn fallback(
        &self,
        item: &Self::Item,
        error: anyhow::Error,
    ) -> anyhow::Result<Batched<Self::Output>> {
        let _ = item;
        Err(error)
    }

    /// Receives the items and their results, aligned by index.
    async fn finalize(
        &self,
        ctx: &mut Context,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> anyhow::Result<Action> {
        let _ = (ctx, items, outputs);
        Ok(Action::Default)
    }
}

/// Runs an [`AsyncBatchUnit`], computing items concurrently.
pub struct AsyncBatchNode<U> {
    name: String,
    unit: U,
    retry: RetryPolicy,
    concurrency: Option<usize>,
}

impl<U: AsyncBatchUnit> AsyncBatchNode<U> {
    /// Creates a batch node with unbounded item concurrency.
    pub fn new(name: impl Into<String>, unit: U) -> Self {
        Self {
            name: name.into(),
            unit,
            retry: RetryPolicy::default(),
            concurrency: None,
        }
    }

    /// Replaces the retry policy applied to each item.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-item attempt budget.
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

    /// Applies the node-level defaults of `config`: its retry policy and
    /// batch concurrency.
    #[must_use]
    pub fn with_config(mut self, config: &FlowConfig) -> Self {
        self.retry = config.retry.clone();
        self.with_concurrency(config.batch_concurrency)
    }

    /// Caps the number of items in flight; `None` runs all at once and `Some(1)`
    /// computes items one after another.
    #[must_use]
    pub fn with_concurrency(mut self, limit: Option<usize>) -> Self {
        self.concurrency = limit.map(|n| n.max(1));
        self
    }

    /// Returns the wrapped unit.
    pub fn unit(&self) -> &U {
        &self.unit
    }

    /// Computes all items concurrently and returns the aligned results.
    ///
    /// Once an item has failed for good, items that have not started yet are
    /// skipped while the ones already in flight finish. The failure with the
    /// lowest item index is returned and all results are discarded.
    pub async fn compute_items(&self, items: &[U::Item]) -> FlowResult<Vec<U::Output>> {
        let limit = self.concurrency.unwrap_or(items.len()).max(1);
        let failed = AtomicBool::new(false);

        let computations: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(index, item)| Box::pin(self.compute_item(index, item, &failed)))
            .collect();
        let results: Vec<Option<FlowResult<Batched<U::Output>>>> = stream::iter(computations)
            .buffered(limit)
            .collect()
            .await;

        let nested = results
            .into_iter()
            .flatten()
            .collect::<FlowResult<Vec<_>>>()?;
        let outputs = flatten_results(nested);
        check_cardinality(&self.name, items.len(), outputs.len())?;
        Ok(outputs)
    }

    /// Returns `None` when the batch had already failed before this item started.
    async fn compute_item(
        &self,
        index: usize,
        item: &U::Item,
        failed: &AtomicBool,
    ) -> Option<FlowResult<Batched<U::Output>>> {
        if failed.load(Ordering::Relaxed) {
            tracing::debug!(node = %self.name, item = index, "skipping item after batch failure");
            return None;
        }
        let result = execute_with_retry_async(
            &self.retry,
            &self.name,
            Some(index),
            item,
            |i| self.unit.compute(i),
            |i, e| self.unit.fallback(i, e),
        )
        .await;
        if result.is_err() {
            failed.store(true, Ordering::Relaxed);
        }
        Some(result)
    }
}

impl<U> Debug for AsyncBatchNode<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBatchNode")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl<U> Named for AsyncBatchNode<U> {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<U: AsyncBatchUnit> AsyncStep for AsyncBatchNode<U> {
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        let items = self
            .unit
            .prepare(ctx)
            .await
            .map_err(|e| FlowError::prepare(&self.name, e))?;
        tracing::debug!(
            node = %self.name,
            items = items.len(),
            concurrency = ?self.concurrency,
            "computing batch"
        );

        let outputs = self.compute_items(&items).await?;

        self.unit
            .finalize(ctx, items, outputs)
            .await
            .map_err(|e| FlowError::finalize(&self.name, e))
    }
}
