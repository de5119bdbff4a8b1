//! Graph State Trait and Types
//!
//! Defines the state management interface for workflow graphs.
//! A state type declares its fields and their merge policies through a
//! [`StateSchema`]; the engine never writes a field the schema does not know.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ReducerType, WorkflowError, WorkflowResult};

/// Graph state trait
///
/// Implement this trait to define custom state types for workflows.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct MyState {
///     messages: Vec<String>,
///     result: Option<String>,
/// }
///
/// impl GraphState for MyState {
///     fn schema() -> StateSchema {
///         StateSchema::new("MyState")
///             .field("messages", ReducerType::Append)
///             .field("result", ReducerType::Overwrite)
///     }
///
///     fn get_value(&self, key: &str) -> Option<Value> {
///         match key {
///             "messages" => serde_json::to_value(&self.messages).ok(),
///             "result" => serde_json::to_value(&self.result).ok(),
///             _ => None,
///         }
///     }
///
///     fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()> {
///         match key {
///             "messages" => self.messages = serde_json::from_value(value)?,
///             "result" => self.result = serde_json::from_value(value)?,
///             other => return Err(WorkflowError::merge(other, "unknown field")),
///         }
///         Ok(())
///     }
///     // ...
/// }
/// ```
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Field declarations and merge policies of this state type
    fn schema() -> StateSchema;

    /// Current value of a field, or None if it is unset
    fn get_value(&self, key: &str) -> Option<Value>;

    /// Replace the value of a field. Merge policies are applied by the caller;
    /// this only stores the already-reduced value.
    fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()>;

    /// Convert entire state to a JSON Value
    fn to_json(&self) -> WorkflowResult<Value>;

    /// Create state from a JSON Value
    fn from_json(value: Value) -> WorkflowResult<Self>;

    /// Typed read of a field
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_value(key).and_then(|v| {
            match serde_json::from_value(v) {
                Ok(val) => Some(val),
                Err(e) => {
                    tracing::warn!(key = key, error = %e, "GraphState::get_as deserialization failed");
                    None
                }
            }
        })
    }
}

/// State schema
///
/// Describes the fields of a graph's state and the merge policy of each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSchema {
    /// Schema name
    pub name: String,
    /// Field definitions
    pub fields: Vec<StateField>,
    /// Open schemas accept unknown fields with overwrite semantics
    #[serde(default)]
    pub open: bool,
}

impl StateSchema {
    /// Create a new closed schema
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            open: false,
        }
    }

    /// Create an open schema; unknown fields are accepted and overwritten
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            open: true,
            ..Self::new(name)
        }
    }

    /// Add a field to the schema
    pub fn add_field(mut self, field: StateField) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a field with the given merge policy
    pub fn field(self, name: impl Into<String>, policy: ReducerType) -> Self {
        self.add_field(StateField::new(name, policy))
    }

    /// Get a field by name
    pub fn get_field(&self, name: &str) -> Option<&StateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve the declaration governing `name`.
    ///
    /// Closed schemas reject unknown names with a merge error.
    pub fn resolve(&self, name: &str) -> WorkflowResult<StateField> {
        match self.get_field(name) {
            Some(field) => Ok(field.clone()),
            None if self.open => Ok(StateField::new(name, ReducerType::Overwrite)),
            None => Err(WorkflowError::merge(
                name,
                format!("field is not declared in state schema '{}'", self.name),
            )),
        }
    }

    /// Get all field names
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Reject duplicate field declarations
    pub fn validate(&self) -> WorkflowResult<()> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(WorkflowError::ValidationFailed(format!(
                    "field '{}' declared twice in state schema '{}'",
                    field.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// A single field in the state schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateField {
    /// Field name
    pub name: String,
    /// Merge policy
    pub policy: ReducerType,
    /// Whether the field may be written at most once per run
    #[serde(default)]
    pub write_once: bool,
    /// Field description
    pub description: Option<String>,
}

impl StateField {
    /// Create a new state field
    pub fn new(name: impl Into<String>, policy: ReducerType) -> Self {
        Self {
            name: name.into(),
            policy,
            write_once: false,
            description: None,
        }
    }

    /// Mark the field write-once
    pub fn write_once(mut self) -> Self {
        self.write_once = true;
        self
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A simple JSON-based state implementation
///
/// Backed by a JSON object with an open schema. Useful for simple workflows
/// or testing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonState {
    data: serde_json::Map<String, Value>,
}

impl JsonState {
    /// Create a new empty JSON state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a JSON object
    pub fn from_map(data: serde_json::Map<String, Value>) -> Self {
        Self { data }
    }

    /// Get a reference to the underlying map
    pub fn as_map(&self) -> &serde_json::Map<String, Value> {
        &self.data
    }
}

impl GraphState for JsonState {
    fn schema() -> StateSchema {
        StateSchema::open("JsonState")
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    fn to_json(&self) -> WorkflowResult<Value> {
        Ok(Value::Object(self.data.clone()))
    }

    fn from_json(value: Value) -> WorkflowResult<Self> {
        match value {
            Value::Object(map) => Ok(Self { data: map }),
            _ => Err(WorkflowError::Serialization(
                "State must be a JSON object".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_state() {
        let mut state = JsonState::new();

        state.set_value("name", json!("test")).unwrap();
        state.set_value("count", json!(42)).unwrap();

        assert_eq!(state.get_value("name"), Some(json!("test")));
        assert_eq!(state.get_as::<u32>("count"), Some(42));
        assert_eq!(state.get_as::<u32>("name"), None);
        assert_eq!(state.as_map().len(), 2);
    }

    #[test]
    fn test_state_schema_resolution() {
        let schema = StateSchema::new("Report")
            .field("completed_sections", ReducerType::Append)
            .add_field(
                StateField::new("final_report", ReducerType::Overwrite)
                    .write_once()
                    .with_description("Terminal output"),
            );

        assert_eq!(schema.field_names(), vec!["completed_sections", "final_report"]);
        assert!(schema.resolve("final_report").unwrap().write_once);

        let err = schema.resolve("bogus").unwrap_err();
        assert!(matches!(err, WorkflowError::Merge { ref field, .. } if field == "bogus"));
    }

    #[test]
    fn test_open_schema_accepts_unknown_fields() {
        let field = StateSchema::open("loose").resolve("anything").unwrap();
        assert_eq!(field.policy, ReducerType::Overwrite);
        assert!(!field.write_once);
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let schema = StateSchema::new("dup")
            .field("a", ReducerType::Overwrite)
            .field("a", ReducerType::Append);
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_json_state_invalid_input() {
        assert!(JsonState::from_json(json!("not an object")).is_err());
        let state = JsonState::from_json(json!({"k": 1})).unwrap();
        assert_eq!(state.get_value("k"), Some(json!(1)));
    }
}
