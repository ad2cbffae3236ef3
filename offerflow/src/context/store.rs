//! The shared key-value store threaded through a pipeline run.

use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable, untyped store shared by every node of a run.
///
/// The caller seeds input keys before `run` and reads result keys afterwards.
/// Nodes see it as `&Context` in `prepare` and `&mut Context` in `finalize`;
/// `compute` never receives it, so concurrent item work cannot race on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    data: Map<String, Value>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from a JSON object.
    ///
    /// # Errors
    ///
    /// Fails when `value` is not an object.
    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        match value {
            Value::Object(data) => Ok(Self { data }),
            other => anyhow::bail!("context must be a JSON object, got {}", json_kind(&other)),
        }
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Gets a mutable reference to a value.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Reads a key and deserializes it.
    ///
    /// # Errors
    ///
    /// Fails when the key is missing or holds a value of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .data
            .get(key)
            .with_context(|| format!("context key '{key}' is missing"))?;
        T::deserialize(value).with_context(|| format!("context key '{key}' has an unexpected shape"))
    }

    /// Reads a key, falling back to `default` when it is absent or malformed.
    #[must_use]
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Serializes and inserts a value.
    ///
    /// # Errors
    ///
    /// Fails when `value` cannot be represented as JSON.
    pub fn insert_serialized<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Value>, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.data.insert(key.into(), value))
    }

    /// Removes a key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Returns a copy of the context as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    /// Consumes the context, returning the underlying map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.data
    }
}

impl From<Map<String, Value>> for Context {
    fn from(data: Map<String, Value>) -> Self {
        Self { data }
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
