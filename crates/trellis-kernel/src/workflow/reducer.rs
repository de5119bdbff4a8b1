//! Reducer Trait and Types
//!
//! Defines the merge policies that govern how a node's partial update combines
//! with the current value of a state field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WorkflowResult;

/// Reducer trait for state update strategies
///
/// A Reducer defines how to merge a state update with an existing value.
/// Each field of a state schema is bound to exactly one reducer.
///
/// # Example
///
/// ```rust,ignore
/// // completed_sections: ["a"] + ["b"] => ["a", "b"]
/// let merged = AppendReducer.reduce(Some(&json!(["a"])), &json!(["b"])).await?;
/// ```
#[async_trait]
pub trait Reducer: Send + Sync {
    /// Reduce the current value with the update value
    ///
    /// # Arguments
    /// * `current` - The current value (None if the field was never set)
    /// * `update` - The new value to merge
    async fn reduce(&self, current: Option<&Value>, update: &Value) -> WorkflowResult<Value>;

    /// Returns the name of this reducer
    fn name(&self) -> &str;

    /// Returns the type of this reducer
    fn reducer_type(&self) -> ReducerType;
}

/// Merge policy of a state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReducerType {
    /// Overwrite the current value with the update (default)
    #[default]
    Overwrite,

    /// Concatenate the update onto a list. Array updates are concatenated
    /// element-wise, scalar updates are pushed as one element.
    Append,
}

impl std::fmt::Display for ReducerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReducerType::Overwrite => write!(f, "overwrite"),
            ReducerType::Append => write!(f, "append"),
        }
    }
}

/// State update operation
///
/// Represents a single key-value update to be applied to the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// The key to update
    pub key: String,
    /// The new value
    pub value: Value,
}

impl StateUpdate {
    /// Create a new state update
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Create a state update from a serializable value
    pub fn from_serializable<T: Serialize>(key: impl Into<String>, value: &T) -> WorkflowResult<Self> {
        Ok(Self::new(key, serde_json::to_value(value)?))
    }
}

impl From<(String, Value)> for StateUpdate {
    fn from((key, value): (String, Value)) -> Self {
        Self::new(key, value)
    }
}

impl From<(&str, Value)> for StateUpdate {
    fn from((key, value): (&str, Value)) -> Self {
        Self::new(key, value)
    }
}
