//! Fan-out units whose `compute` runs once per prepared item.

use super::{AsyncStep, Named, Step};
use crate::config::FlowConfig;
use crate::context::Context;
use crate::core::Action;
use crate::errors::{FlowError, FlowResult};
use crate::pipeline::retry::execute_with_retry;
use crate::pipeline::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::time::Duration;

/// Result of computing one batch item.
///
/// Collaborators that answer a single item with a one-element list are
/// accepted as well: the executor flattens one level and then checks that
/// there is exactly one result per item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batched<T> {
    /// A single result.
    One(T),
    /// A list of results to be spliced into the output sequence.
    Many(Vec<T>),
}

impl<T> Batched<T> {
    /// Returns how many results this value contributes.
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    /// Returns true if this value contributes no results.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts into a flat vector.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl<T> From<T> for Batched<T> {
    fn from(value: T) -> Self {
        Self::One(value)
    }
}

/// Flattens per-item results into one ordered sequence.
pub fn flatten_results<T>(results: impl IntoIterator<Item = Batched<T>>) -> Vec<T> {
    let mut flat = Vec::new();
    for result in results {
        match result {
            Batched::One(value) => flat.push(value),
            Batched::Many(values) => flat.extend(values),
        }
    }
    flat
}

/// Builds an identifier lookup over batch outputs, as `finalize` typically
/// needs to merge results back into the records they were derived from.
///
/// Later entries win when two outputs share a key.
pub fn index_by<K, T, F>(outputs: impl IntoIterator<Item = T>, key: F) -> HashMap<K, T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    outputs.into_iter().map(|output| (key(&output), output)).collect()
}

pub(crate) fn check_cardinality(node: &str, expected: usize, actual: usize) -> FlowResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(FlowError::Cardinality {
            node: node.to_string(),
            expected,
            actual,
        })
    }
}

/// The contract of a synchronous batch unit.
pub trait BatchUnit: Send + Sync {
    /// One element of the prepared collection.
    type Item: Send + Sync;
    /// The result computed for one item.
    type Output: Send;

    /// Produces the ordered item collection. May be empty.
    fn prepare(&self, ctx: &Context) -> anyhow::Result<Vec<Self::Item>>;

    /// Computes the result for a single item.
    fn compute(&self, item: &Self::Item) -> anyhow::Result<Batched<Self::Output>>;

    /// Produces a degraded result for an item whose attempts all failed.
    fn fallback(
        &self,
        item: &Self::Item,
        error: anyhow::Error,
    ) -> anyhow::Result<Batched<Self::Output>> {
        let _ = item;
        Err(error)
    }

    /// Receives the items and their results, aligned by index.
    fn finalize(
        &self,
        ctx: &mut Context,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> anyhow::Result<Action> {
        let _ = (ctx, items, outputs);
        Ok(Action::Default)
    }
}

/// Runs a [`BatchUnit`] item by item with a per-item retry policy.
pub struct BatchNode<U> {
    name: String,
    unit: U,
    retry: RetryPolicy,
}

impl<U: BatchUnit> BatchNode<U> {
    /// Creates a batch node with a single-attempt policy.
    pub fn new(name: impl Into<String>, unit: U) -> Self {
        Self {
            name: name.into(),
            unit,
            retry: RetryPolicy::default(),
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

    /// Computes every item in order and returns the flattened, aligned results.
    ///
    /// Stops at the first item that exhausts its attempts without a fallback.
    pub fn compute_items(&self, items: &[U::Item]) -> FlowResult<Vec<U::Output>> {
        let mut nested = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let result = execute_with_retry(
                &self.retry,
                &self.name,
                Some(index),
                item,
                |i| self.unit.compute(i),
                |i, e| self.unit.fallback(i, e),
            )?;
            nested.push(result);
        }

        let outputs = flatten_results(nested);
        check_cardinality(&self.name, items.len(), outputs.len())?;
        Ok(outputs)
    }
}

impl<U> Debug for BatchNode<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchNode")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish()
    }
}

impl<U> Named for BatchNode<U> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl<U: BatchUnit> Step for BatchNode<U> {
    fn run(&self, ctx: &mut Context) -> FlowResult<Action> {
        let items = self
            .unit
            .prepare(ctx)
            .map_err(|e| FlowError::prepare(&self.name, e))?;
        tracing::debug!(node = %self.name, items = items.len(), "computing batch");

        let outputs = self.compute_items(&items)?;

        self.unit
            .finalize(ctx, items, outputs)
            .map_err(|e| FlowError::finalize(&self.name, e))
    }
}

#[async_trait]
impl<U: BatchUnit> AsyncStep for BatchNode<U> {
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        Step::run(self, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Squares `numbers`, optionally wrapping each answer in a one-element list.
    struct Squares {
        wrap_in_list: bool,
        fail_on: Option<i64>,
        calls: AtomicUsize,
    }

    impl Squares {
        fn new(wrap_in_list: bool) -> Self {
            Self {
                wrap_in_list,
                fail_on: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl BatchUnit for Squares {
        type Item = i64;
        type Output = i64;

        fn prepare(&self, ctx: &Context) -> anyhow::Result<Vec<i64>> {
            Ok(ctx.get_or("numbers", Vec::new()))
        }

        fn compute(&self, item: &i64) -> anyhow::Result<Batched<i64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(*item) {
                anyhow::bail!("cannot square {item}");
            }
            let square = item * item;
            Ok(if self.wrap_in_list {
                Batched::Many(vec![square])
            } else {
                square.into()
            })
        }

        fn finalize(
            &self,
            ctx: &mut Context,
            items: Vec<i64>,
            outputs: Vec<i64>,
        ) -> anyhow::Result<Action> {
            ctx.insert("item_count", items.len());
            ctx.insert("squares", outputs);
            Ok(Action::Default)
        }
    }

    struct Splitter;

    impl BatchUnit for Splitter {
        type Item = String;
        type Output = String;

        fn prepare(&self, _ctx: &Context) -> anyhow::Result<Vec<String>> {
            Ok(vec!["a b".into(), "c".into()])
        }

        fn compute(&self, item: &String) -> anyhow::Result<Batched<String>> {
            Ok(Batched::Many(item.split(' ').map(str::to_string).collect()))
        }
    }

    #[test]
    fn test_batched_helpers() {
        let one: Batched<u8> = 3.into();
        assert_eq!(one.len(), 1);
        assert_eq!(one.into_vec(), vec![3]);

        let none: Batched<u8> = Batched::Many(vec![]);
        assert!(none.is_empty());

        let flat = flatten_results(vec![Batched::One(1), Batched::Many(vec![2, 3]), Batched::One(4)]);
        assert_eq!(flat, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_index_by_builds_lookup() {
        let lookup = index_by(
            vec![json!({"offer_id": "a", "v": 1}), json!({"offer_id": "b", "v": 2})],
            |r| r["offer_id"].as_str().unwrap_or_default().to_string(),
        );
        assert_eq!(lookup["b"]["v"], json!(2));
        assert_eq!(lookup.len(), 2);
    }

    #[test]
    fn test_batch_cardinality_both_conventions() {
        for wrap in [false, true] {
            let node = BatchNode::new("squares", Squares::new(wrap));
            let mut ctx = Context::from_value(json!({"numbers": [1, 2, 3, 4]})).unwrap();

            node.run(&mut ctx).unwrap();

            assert_eq!(ctx.get("item_count"), Some(&json!(4)));
            assert_eq!(ctx.get("squares"), Some(&json!([1, 4, 9, 16])));
            assert_eq!(node.unit().calls.load(Ordering::SeqCst), 4);
        }
    }

    #[test]
    fn test_compute_items_with_pre_batched_list() {
        let node = BatchNode::new("squares", Squares::new(true));
        let outputs = node.compute_items(&[5, 6]).unwrap();
        assert_eq!(outputs, vec![25, 36]);
    }

    #[test]
    fn test_batch_empty_items_still_finalizes() {
        let node = BatchNode::new("squares", Squares::new(false));
        let mut ctx = Context::new();

        node.run(&mut ctx).unwrap();

        assert_eq!(ctx.get("item_count"), Some(&json!(0)));
        assert_eq!(ctx.get("squares"), Some(&json!([])));
    }

    #[test]
    fn test_batch_item_failure_aborts_without_finalize() {
        let unit = Squares {
            fail_on: Some(2),
            ..Squares::new(false)
        };
        let node = BatchNode::new("squares", unit).with_max_attempts(3);
        let mut ctx = Context::from_value(json!({"numbers": [1, 2, 3]})).unwrap();

        let err = node.run(&mut ctx).unwrap_err();

        match err {
            FlowError::RetriesExhausted(err) => {
                assert_eq!(err.item, Some(1));
                assert_eq!(err.attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        // item 0 once, item 1 three times, item 2 never
        assert_eq!(node.unit().calls.load(Ordering::SeqCst), 4);
        assert!(!ctx.contains_key("squares"));
    }

    #[test]
    fn test_batch_cardinality_mismatch_is_an_error() {
        let node = BatchNode::new("split", Splitter);
        let mut ctx = Context::new();

        let err = node.run(&mut ctx).unwrap_err();

        assert!(matches!(
            err,
            FlowError::Cardinality {
                expected: 2,
                actual: 3,
                ..
            }
        ));
    }
}
