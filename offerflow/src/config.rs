//! Engine configuration loaded from defaults or the environment.
//!
//! Nodes and pipelines are configured through builder methods; a
//! [`FlowConfig`] collects the same knobs so a service can set them once,
//! e.g. from `OFFERFLOW_*` variables, and hand them to every builder.

use crate::errors::ConfigError;
use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Variable holding the default attempt budget.
pub const ENV_MAX_ATTEMPTS: &str = "OFFERFLOW_MAX_ATTEMPTS";
/// Variable holding the default wait between attempts, in milliseconds.
pub const ENV_RETRY_WAIT_MS: &str = "OFFERFLOW_RETRY_WAIT_MS";
/// Variable holding the in-flight item cap for concurrent batches.
pub const ENV_BATCH_CONCURRENCY: &str = "OFFERFLOW_BATCH_CONCURRENCY";
/// Variable holding the pipeline step limit.
pub const ENV_MAX_STEPS: &str = "OFFERFLOW_MAX_STEPS";
/// Variable holding the default log filter.
pub const ENV_LOG_LEVEL: &str = "OFFERFLOW_LOG_LEVEL";
/// Variable holding the log format, `text` or `json`.
pub const ENV_LOG_FORMAT: &str = "OFFERFLOW_LOG_FORMAT";

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Logging settings used by [`init_tracing`](crate::observability::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Engine-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Retry policy for nodes built from this configuration.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// In-flight cap for async batch nodes; `None` is unbounded.
    #[serde(default)]
    pub batch_concurrency: Option<usize>,
    /// Step limit for pipelines; `None` is unlimited.
    #[serde(default)]
    pub max_steps: Option<usize>,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlowConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Loads the configuration from explicit `(name, value)` pairs.
    ///
    /// Unknown names are ignored; empty values leave the default in place.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let mut config = Self::default();

        if let Some(attempts) = parse_var::<usize>(&vars, ENV_MAX_ATTEMPTS)? {
            if attempts == 0 {
                return Err(ConfigError::invalid_value(
                    ENV_MAX_ATTEMPTS,
                    "0",
                    "at least one attempt is required",
                ));
            }
            config.retry = config.retry.with_max_attempts(attempts);
        }
        if let Some(wait_ms) = parse_var::<u64>(&vars, ENV_RETRY_WAIT_MS)? {
            config.retry = config.retry.with_wait(Duration::from_millis(wait_ms));
        }
        if let Some(limit) = parse_var::<usize>(&vars, ENV_BATCH_CONCURRENCY)? {
            config.batch_concurrency = (limit > 0).then_some(limit);
        }
        if let Some(steps) = parse_var::<usize>(&vars, ENV_MAX_STEPS)? {
            config.max_steps = (steps > 0).then_some(steps);
        }
        if let Some(level) = vars.get(ENV_LOG_LEVEL) {
            config.logging.level = level.trim().to_string();
        }
        if let Some(format) = parse_var::<LogFormat>(&vars, ENV_LOG_FORMAT)? {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the batch concurrency cap.
    #[must_use]
    pub fn with_batch_concurrency(mut self, limit: Option<usize>) -> Self {
        self.batch_concurrency = limit;
        self
    }

    /// Sets the pipeline step limit.
    #[must_use]
    pub fn with_max_steps(mut self, steps: Option<usize>) -> Self {
        self.max_steps = steps;
        self
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    vars.get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid_value(name, raw.as_str(), e.to_string()))
        })
        .transpose()
}
