//! Concrete Reducer Implementations
//!
//! Built-in reducers for the two merge policies. Reducers determine how a
//! partial update combines with the current value of a field.

use async_trait::async_trait;
use serde_json::Value;
use trellis_kernel::workflow::{Reducer, ReducerType, WorkflowError, WorkflowResult};

/// Overwrite reducer - replaces the current value with the update
///
/// # Example
///
/// ```rust,ignore
/// // Before: { "decision": "True" }
/// // Update: { "decision": "False" }
/// // After:  { "decision": "False" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct OverwriteReducer;

#[async_trait]
impl Reducer for OverwriteReducer {
    async fn reduce(&self, _current: Option<&Value>, update: &Value) -> WorkflowResult<Value> {
        Ok(update.clone())
    }

    fn name(&self) -> &str {
        "overwrite"
    }

    fn reducer_type(&self) -> ReducerType {
        ReducerType::Overwrite
    }
}

/// Append reducer - concatenates the update onto a list
///
/// Array updates are concatenated element-wise; any other update is pushed as
/// a single element. An unset or null field starts as an empty list.
///
/// # Example
///
/// ```rust,ignore
/// // Before: { "completed_sections": ["done:A"] }
/// // Update: { "completed_sections": ["done:B"] }
/// // After:  { "completed_sections": ["done:A", "done:B"] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct AppendReducer;

#[async_trait]
impl Reducer for AppendReducer {
    async fn reduce(&self, current: Option<&Value>, update: &Value) -> WorkflowResult<Value> {
        let mut arr = match current {
            Some(Value::Array(a)) => a.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(WorkflowError::Execution(format!(
                    "append target holds a non-list value: {}",
                    other
                )));
            }
        };

        match update {
            Value::Array(items) => arr.extend(items.iter().cloned()),
            other => arr.push(other.clone()),
        }

        Ok(Value::Array(arr))
    }

    fn name(&self) -> &str {
        "append"
    }

    fn reducer_type(&self) -> ReducerType {
        ReducerType::Append
    }
}

static OVERWRITE: OverwriteReducer = OverwriteReducer;
static APPEND: AppendReducer = AppendReducer;

/// The reducer implementing a merge policy
pub fn reducer_for(policy: ReducerType) -> &'static dyn Reducer {
    match policy {
        ReducerType::Append => &APPEND,
        _ => &OVERWRITE,
    }
}
