//! StateStore
//!
//! Owns the state record of one run and applies partial updates through each
//! field's declared merge policy.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use trellis_kernel::workflow::{
    GraphState, StateSchema, StateUpdate, WorkflowError, WorkflowResult,
};
use tracing::debug;

use super::reducers::reducer_for;

/// Versioned state of a single run
#[derive(Debug, Clone)]
pub struct StateStore<S: GraphState> {
    state: S,
    schema: Arc<StateSchema>,
    version: u64,
    written_once: BTreeSet<String>,
}

impl<S: GraphState> StateStore<S> {
    /// Wrap the initial state of a run.
    ///
    /// Write-once fields already populated by the caller count as written.
    pub fn new(state: S, schema: Arc<StateSchema>) -> Self {
        let written_once = schema
            .fields
            .iter()
            .filter(|f| f.write_once)
            .filter(|f| !matches!(state.get_value(&f.name), None | Some(Value::Null)))
            .map(|f| f.name.clone())
            .collect();

        Self {
            state,
            schema,
            version: 0,
            written_once,
        }
    }

    /// Rebuild a store from checkpointed parts
    pub fn restore(
        state: S,
        schema: Arc<StateSchema>,
        version: u64,
        written_once: BTreeSet<String>,
    ) -> Self {
        Self {
            state,
            schema,
            version,
            written_once,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    /// Number of partial updates applied so far
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn written_once(&self) -> &BTreeSet<String> {
        &self.written_once
    }

    /// Apply one partial update.
    ///
    /// Every field is checked before anything is written, so a rejected
    /// update leaves the state untouched. Fields not mentioned are left as
    /// they are. An empty update is a no-op and does not bump the version.
    pub async fn apply_update(&mut self, updates: &[StateUpdate]) -> WorkflowResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut fields = Vec::with_capacity(updates.len());
        let mut once_in_batch = BTreeSet::new();
        for update in updates {
            let field = self.schema.resolve(&update.key)?;
            if field.write_once
                && (self.written_once.contains(&field.name)
                    || !once_in_batch.insert(field.name.clone()))
            {
                return Err(WorkflowError::merge(
                    &field.name,
                    "write-once field written a second time",
                ));
            }
            fields.push(field);
        }

        let mut next = self.state.clone();
        for (update, field) in updates.iter().zip(&fields) {
            let current = next.get_value(&update.key);
            let merged = reducer_for(field.policy)
                .reduce(current.as_ref(), &update.value)
                .await
                .map_err(|e| WorkflowError::merge(&field.name, e.to_string()))?;
            next.set_value(&update.key, merged)
                .map_err(|e| WorkflowError::merge(&field.name, e.to_string()))?;
        }

        self.state = next;
        self.written_once.extend(once_in_batch);
        self.version += 1;
        debug!(
            version = self.version,
            fields = ?updates.iter().map(|u| u.key.as_str()).collect::<Vec<_>>(),
            "state updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use trellis_kernel::workflow::{ReducerType, StateField};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Sections {
        topic: Option<String>,
        completed_sections: Vec<String>,
        final_report: Option<String>,
    }

    impl GraphState for Sections {
        fn schema() -> StateSchema {
            StateSchema::new("Sections")
                .add_field(StateField::new("topic", ReducerType::Overwrite).write_once())
                .field("completed_sections", ReducerType::Append)
                .add_field(StateField::new("final_report", ReducerType::Overwrite).write_once())
        }

        fn get_value(&self, key: &str) -> Option<Value> {
            match key {
                "topic" => serde_json::to_value(&self.topic).ok(),
                "completed_sections" => serde_json::to_value(&self.completed_sections).ok(),
                "final_report" => serde_json::to_value(&self.final_report).ok(),
                _ => None,
            }
        }

        fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()> {
            match key {
                "topic" => self.topic = serde_json::from_value(value)?,
                "completed_sections" => self.completed_sections = serde_json::from_value(value)?,
                "final_report" => self.final_report = serde_json::from_value(value)?,
                other => return Err(WorkflowError::merge(other, "unknown field")),
            }
            Ok(())
        }

        fn to_json(&self) -> WorkflowResult<Value> {
            Ok(serde_json::to_value(self)?)
        }

        fn from_json(value: Value) -> WorkflowResult<Self> {
            Ok(serde_json::from_value(value)?)
        }
    }

    fn store() -> StateStore<Sections> {
        StateStore::new(Sections::default(), Arc::new(Sections::schema()))
    }

    #[tokio::test]
    async fn test_two_appends_yield_two_elements() {
        let mut store = store();
        store
            .apply_update(&[StateUpdate::new("completed_sections", json!(["one"]))])
            .await
            .unwrap();
        store
            .apply_update(&[StateUpdate::new("completed_sections", json!(["two"]))])
            .await
            .unwrap();

        assert_eq!(store.state().completed_sections, vec!["one", "two"]);
        assert_eq!(store.version(), 2);
    }

    #[tokio::test]
    async fn test_unknown_field_rejected_without_partial_write() {
        let mut store = store();
        let err = store
            .apply_update(&[
                StateUpdate::new("completed_sections", json!(["one"])),
                StateUpdate::new("bogus", json!(1)),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Merge { ref field, .. } if field == "bogus"));
        assert!(store.state().completed_sections.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_write_once_field() {
        let mut store = store();
        store
            .apply_update(&[StateUpdate::new("final_report", json!("report"))])
            .await
            .unwrap();
        let err = store
            .apply_update(&[StateUpdate::new("final_report", json!("again"))])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Merge { .. }));
        assert_eq!(store.state().final_report.as_deref(), Some("report"));
    }

    #[tokio::test]
    async fn test_write_once_twice_in_one_batch() {
        let mut store = store();
        let result = store
            .apply_update(&[
                StateUpdate::new("final_report", json!("a")),
                StateUpdate::new("final_report", json!("b")),
            ])
            .await;
        assert!(result.is_err());
        assert!(store.written_once().is_empty());
    }

    #[tokio::test]
    async fn test_initial_input_counts_as_written() {
        let initial = Sections {
            topic: Some("Rust".to_string()),
            ..Sections::default()
        };
        let mut store = StateStore::new(initial, Arc::new(Sections::schema()));
        assert!(store.written_once().contains("topic"));

        let result = store
            .apply_update(&[StateUpdate::new("topic", json!("Go"))])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_update_is_noop() {
        let mut store = store();
        store.apply_update(&[]).await.unwrap();
        assert_eq!(store.version(), 0);
    }
}
