//! Scripted units for testing pipelines.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::Context;
use crate::core::Action;
use crate::nodes::{AsyncBatchUnit, Batched, Unit};

/// A unit whose `compute` fails a fixed number of times before succeeding.
///
/// `finalize` stores the output under `key` and returns the configured
/// action. Attempts and the value `finalize` received are recorded.
#[derive(Debug)]
pub struct ScriptedUnit {
    key: String,
    value: Value,
    failures: usize,
    fallback: Option<Value>,
    action: Action,
    attempts: AtomicUsize,
    finalized: Mutex<Vec<Value>>,
}

impl ScriptedUnit {
    /// Creates a unit that succeeds on the first attempt with `value`.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            failures: 0,
            fallback: None,
            action: Action::Default,
            attempts: AtomicUsize::new(0),
            finalized: Mutex::new(Vec::new()),
        }
    }

    /// Creates a unit whose `compute` never succeeds.
    #[must_use]
    pub fn always_failing(key: impl Into<String>) -> Self {
        Self::new(key, Value::Null).failing(usize::MAX)
    }

    /// Fails the first `count` attempts.
    #[must_use]
    pub fn failing(mut self, count: usize) -> Self {
        self.failures = count;
        self
    }

    /// Recovers with `value` once attempts are exhausted.
    #[must_use]
    pub fn with_fallback(mut self, value: impl Into<Value>) -> Self {
        self.fallback = Some(value.into());
        self
    }

    /// Returns `action` from `finalize`.
    #[must_use]
    pub fn returning(mut self, action: impl Into<Action>) -> Self {
        self.action = action.into();
        self
    }

    /// Returns how many times `compute` ran.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Returns the outputs `finalize` received, one per run.
    #[must_use]
    pub fn finalized(&self) -> Vec<Value> {
        self.finalized.lock().clone()
    }
}

impl Unit for ScriptedUnit {
    type Prep = ();
    type Output = Value;

    fn prepare(&self, _ctx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    fn compute(&self, _prep: &()) -> anyhow::Result<Value> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            anyhow::bail!("scripted failure {attempt}");
        }
        Ok(self.value.clone())
    }

    fn fallback(&self, _prep: &(), error: anyhow::Error) -> anyhow::Result<Value> {
        self.fallback.clone().ok_or(error)
    }

    fn finalize(&self, ctx: &mut Context, _prep: (), output: Value) -> anyhow::Result<Action> {
        self.finalized.lock().push(output.clone());
        ctx.insert(self.key.clone(), output);
        Ok(self.action.clone())
    }
}

/// An async batch unit that sleeps for a fixed latency per item.
///
/// Items are read from the `items` context key, echoed back unchanged and
/// written to `results`. The peak number of items in flight is recorded.
#[derive(Debug)]
pub struct SleepyBatchUnit {
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SleepyBatchUnit {
    /// Creates a unit with the given per-item latency.
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Returns the highest number of items computed at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsyncBatchUnit for SleepyBatchUnit {
    type Item = Value;
    type Output = Value;

    async fn prepare(&self, ctx: &Context) -> anyhow::Result<Vec<Value>> {
        Ok(ctx.get_or("items", Vec::new()))
    }

    async fn compute(&self, item: &Value) -> anyhow::Result<Batched<Value>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(item.clone().into())
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _items: Vec<Value>,
        outputs: Vec<Value>,
    ) -> anyhow::Result<Action> {
        ctx.insert("results", outputs);
        Ok(Action::Default)
    }
}
