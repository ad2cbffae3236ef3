//! Retry policy and the bounded-attempt executors wrapped around `compute`.
//!
//! A policy allows `max_attempts` total calls (first call included). Between
//! attempts the executor waits for a delay derived from `wait`, the backoff
//! strategy and optional jitter. Once attempts run out the node's fallback is
//! consulted; a fallback that re-raises turns into [`ExhaustedRetryError`].

use crate::errors::{ExhaustedRetryError, FlowResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff strategy for the delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = wait
    #[default]
    Constant,
    /// delay = wait * attempt
    Linear,
    /// delay = wait * 2^(attempt - 1)
    Exponential,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Bounded retry configuration for a node's `compute` phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub max_attempts: usize,
    /// Base wait between attempts.
    #[serde(with = "duration_ms")]
    pub wait: Duration,
    /// Upper bound for any single wait.
    #[serde(with = "duration_ms")]
    pub max_wait: Duration,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            wait: Duration::ZERO,
            max_wait: Duration::from_secs(30),
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a single-attempt policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with `max_attempts` attempts and a constant `wait`.
    #[must_use]
    pub fn attempts(max_attempts: usize, wait: Duration) -> Self {
        Self::new().with_max_attempts(max_attempts).with_wait(wait)
    }

    /// Sets the total attempt budget; zero is clamped to one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base wait between attempts.
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the cap on a single wait.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Attempt budget with deserialized zeroes clamped.
    #[must_use]
    pub fn effective_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the failed attempt number `attempt` (1-indexed).
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = u64::try_from(self.wait.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_wait.as_millis()).unwrap_or(u64::MAX);
        let step = attempt.max(1) as u64;

        let delay = match self.backoff {
            BackoffStrategy::Constant => base,
            BackoffStrategy::Linear => base.saturating_mul(step),
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(step - 1).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp))
            }
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Runs `compute` under `policy`, blocking the thread between attempts.
///
/// `fallback` receives the last error once attempts are exhausted; returning
/// `Err` from it reports [`ExhaustedRetryError`].
pub(crate) fn execute_with_retry<P, T, C, F>(
    policy: &RetryPolicy,
    node: &str,
    item: Option<usize>,
    input: &P,
    mut compute: C,
    fallback: F,
) -> FlowResult<T>
where
    P: ?Sized,
    C: FnMut(&P) -> anyhow::Result<T>,
    F: FnOnce(&P, anyhow::Error) -> anyhow::Result<T>,
{
    let max_attempts = policy.effective_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match compute(input) {
            Ok(output) => return Ok(output),
            Err(error) => {
                log_failed_attempt(node, item, attempt, max_attempts, &error);
                if attempt >= max_attempts {
                    return recover(node, item, attempt, fallback(input, error));
                }
                let delay = policy.delay_after(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

/// Async counterpart of [`execute_with_retry`], sleeping on the tokio timer.
pub(crate) async fn execute_with_retry_async<'a, P, T, C, CFut, F, FFut>(
    policy: &RetryPolicy,
    node: &str,
    item: Option<usize>,
    input: &'a P,
    mut compute: C,
    fallback: F,
) -> FlowResult<T>
where
    P: ?Sized,
    C: FnMut(&'a P) -> CFut,
    CFut: Future<Output = anyhow::Result<T>>,
    F: FnOnce(&'a P, anyhow::Error) -> FFut,
    FFut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.effective_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match compute(input).await {
            Ok(output) => return Ok(output),
            Err(error) => {
                log_failed_attempt(node, item, attempt, max_attempts, &error);
                if attempt >= max_attempts {
                    return recover(node, item, attempt, fallback(input, error).await);
                }
                let delay = policy.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn log_failed_attempt(
    node: &str,
    item: Option<usize>,
    attempt: usize,
    max_attempts: usize,
    error: &anyhow::Error,
) {
    tracing::warn!(
        node,
        item,
        attempt,
        max_attempts,
        error = %error,
        "compute attempt failed"
    );
}

fn recover<T>(
    node: &str,
    item: Option<usize>,
    attempts: usize,
    fallback: anyhow::Result<T>,
) -> FlowResult<T> {
    match fallback {
        Ok(output) => {
            tracing::info!(node, item, attempts, "fallback result used");
            Ok(output)
        }
        Err(source) => Err(ExhaustedRetryError::new(node, item, attempts, source).into()),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
