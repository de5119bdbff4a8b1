//! Execution events
//!
//! Emitted by the executor to an optional channel so callers can observe a run
//! step by step. Delivery is best effort: a dropped receiver never fails a run.

use serde::{Deserialize, Serialize};

use super::{ResponseKind, ResumeToken};

/// Execution event emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A run started from the entry point
    RunStarted { run_id: String, graph_id: String },

    /// A main-path node started
    NodeStarted { run_id: String, node: String },

    /// A main-path node finished and its updates were merged
    NodeCompleted {
        run_id: String,
        node: String,
        updated_fields: Vec<String>,
    },

    /// A fan-out generation was dispatched
    GenerationDispatched {
        run_id: String,
        generation: u64,
        worker: String,
        size: usize,
    },

    /// One worker of a generation finished
    WorkerCompleted {
        run_id: String,
        generation: u64,
        index: usize,
    },

    /// Every worker of a generation finished and outputs were merged
    GenerationJoined {
        run_id: String,
        generation: u64,
        size: usize,
    },

    /// A node suspended for review
    Interrupted {
        run_id: String,
        node: String,
        generation: Option<u64>,
        index: Option<usize>,
        token: ResumeToken,
    },

    /// A reviewer response was delivered
    Resumed {
        run_id: String,
        node: String,
        token: ResumeToken,
        response: ResponseKind,
    },

    /// The run reached END
    RunCompleted { run_id: String },

    /// The run failed
    RunFailed { run_id: String, error: String },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::GenerationDispatched { run_id, .. }
            | Self::WorkerCompleted { run_id, .. }
            | Self::GenerationJoined { run_id, .. }
            | Self::Interrupted { run_id, .. }
            | Self::Resumed { run_id, .. }
            | Self::RunCompleted { run_id }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }

    /// Whether this event ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. } | Self::RunFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let event = ExecutionEvent::WorkerCompleted {
            run_id: "r".to_string(),
            generation: 1,
            index: 2,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "worker_completed", "data": {"run_id": "r", "generation": 1, "index": 2}})
        );
        assert_eq!(event.run_id(), "r");
        assert!(!event.is_terminal());
        assert!(ExecutionEvent::RunCompleted { run_id: "r".into() }.is_terminal());
    }
}
