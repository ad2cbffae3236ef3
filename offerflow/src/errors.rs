//! Error types for the offerflow engine.
//!
//! Unit authors return [`anyhow::Error`] from their phases; the engine wraps
//! those into [`FlowError`] with the node name and phase attached, so a caller
//! of `Pipeline::run` can tell a failed preparation from exhausted retries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type FlowResult<T> = Result<T, FlowError>;

/// The main error type for pipeline runs.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The pipeline graph failed validation at build time.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A node's `prepare` phase failed.
    #[error("node '{node}' failed to prepare: {source}")]
    Prepare {
        /// The node name.
        node: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// A node's `finalize` phase failed.
    #[error("node '{node}' failed to finalize: {source}")]
    Finalize {
        /// The node name.
        node: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// `compute` failed on every attempt and no fallback recovered it.
    #[error("{0}")]
    RetriesExhausted(#[from] ExhaustedRetryError),

    /// A batch executor produced a result count different from its item count.
    #[error("node '{node}' produced {actual} results for {expected} items")]
    Cardinality {
        /// The node name.
        node: String,
        /// Number of prepared items.
        expected: usize,
        /// Number of flattened results.
        actual: usize,
    },

    /// The pipeline visited more nodes than its configured step limit.
    #[error("pipeline '{pipeline}' exceeded its limit of {limit} steps")]
    StepLimitExceeded {
        /// The pipeline name.
        pipeline: String,
        /// The configured limit.
        limit: usize,
    },
}

impl FlowError {
    /// Wraps a preparation failure.
    pub fn prepare(node: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Prepare {
            node: node.into(),
            source,
        }
    }

    /// Wraps a finalization failure.
    pub fn finalize(node: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Finalize {
            node: node.into(),
            source,
        }
    }

    /// Returns the name of the node the error originated in, if any.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Prepare { node, .. }
            | Self::Finalize { node, .. }
            | Self::Cardinality { node, .. } => Some(node),
            Self::RetriesExhausted(err) => Some(&err.node),
            Self::Validation(_) | Self::StepLimitExceeded { .. } => None,
        }
    }

    /// Returns true if the error came from exhausted compute retries.
    #[must_use]
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted(_))
    }
}

/// Raised when every compute attempt failed and the fallback re-raised.
#[derive(Debug, Error)]
#[error("node '{node}'{} gave up after {attempts} attempt(s): {source}", .item.map(|i| format!(" item {i}")).unwrap_or_default())]
pub struct ExhaustedRetryError {
    /// The node name.
    pub node: String,
    /// Index of the failing batch item, `None` for single-item nodes.
    pub item: Option<usize>,
    /// Number of compute attempts made.
    pub attempts: usize,
    /// The error returned by the fallback (the last compute error by default).
    #[source]
    pub source: anyhow::Error,
}

impl ExhaustedRetryError {
    /// Creates a new exhausted retry error.
    pub fn new(
        node: impl Into<String>,
        item: Option<usize>,
        attempts: usize,
        source: anyhow::Error,
    ) -> Self {
        Self {
            node: node.into(),
            item,
            attempts,
            source,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "FLOW-EMPTY").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline graph fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The nodes involved in the error.
    pub nodes: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("failed to install tracing subscriber: {0}")]
    Logging(String),
}

impl ConfigError {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(
        var: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            var: var.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
