//! Action labels returned by `finalize`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The label a node's `finalize` returns to select its successor.
///
/// The default edge is a distinguished variant rather than the literal string
/// `"default"`; converting the string `"default"` yields [`Action::Default`],
/// so both spellings address the same edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    /// The edge used when a node does not choose another action.
    #[default]
    Default,
    /// A user-defined branch label.
    Named(String),
}

impl Action {
    /// The literal used for [`Action::Default`] in logs and serialized form.
    pub const DEFAULT_LABEL: &'static str = "default";

    /// Creates an action from a label.
    #[must_use]
    pub fn named(label: impl Into<String>) -> Self {
        Self::from(label.into())
    }

    /// Returns the action's label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Default => Self::DEFAULT_LABEL,
            Self::Named(label) => label,
        }
    }

    /// Returns true for the default action.
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl From<String> for Action {
    fn from(label: String) -> Self {
        if label == Self::DEFAULT_LABEL {
            Self::Default
        } else {
            Self::Named(label)
        }
    }
}

impl From<&str> for Action {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Default => Action::DEFAULT_LABEL.to_string(),
            Action::Named(label) => label,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
