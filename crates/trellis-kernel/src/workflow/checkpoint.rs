//! Run checkpoints
//!
//! A suspended run is persisted as a [`Checkpoint`] so that a later call, in
//! this process or another, can deliver the reviewer response and continue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::{PendingReview, ResumeToken, StateUpdate, WorkflowResult};

/// Where a suspended run picks up again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// A main-path node is waiting for review
    Node { node: String },
    /// A fan-out generation is waiting on one or more workers
    Generation(GenerationCheckpoint),
}

/// Barrier state of a generation with suspended workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCheckpoint {
    pub generation: u64,
    pub worker: String,
    /// One slot per dispatch request, in dispatch order
    pub slots: Vec<Slot>,
}

impl GenerationCheckpoint {
    /// Index of the slot suspended under `token`
    pub fn slot_for(&self, token: &ResumeToken) -> Option<usize> {
        self.slots.iter().position(|slot| match slot {
            Slot::Suspended { token: t, .. } => t == token,
            Slot::Done { .. } => false,
        })
    }

    /// Whether every worker has produced its output
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| matches!(s, Slot::Done { .. }))
    }
}

/// Output slot of one worker invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Slot {
    /// Worker finished; its updates wait for the barrier
    Done { updates: Vec<StateUpdate> },
    /// Worker suspended; `input` is its worker state
    Suspended { token: ResumeToken, input: Value },
}

/// Persisted state of a suspended run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub graph_id: String,
    /// Full run state
    pub state: Value,
    /// State version at suspension
    pub version: u64,
    /// Write-once fields already written
    pub written_once: BTreeSet<String>,
    /// Last generation number handed out
    pub generation: u64,
    /// Steps consumed against the recursion limit
    pub steps_used: u32,
    pub cursor: Cursor,
    /// Reviews still awaiting a response
    pub pending: Vec<PendingReview>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Pending review registered under `token`
    pub fn pending_for(&self, token: &ResumeToken) -> Option<&PendingReview> {
        self.pending.iter().find(|p| &p.token == token)
    }

    /// Remove and return the pending review registered under `token`
    pub fn take_pending(&mut self, token: &ResumeToken) -> Option<PendingReview> {
        let position = self.pending.iter().position(|p| &p.token == token)?;
        Some(self.pending.remove(position))
    }
}

/// Storage for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store or replace the checkpoint of a run
    async fn save(&self, checkpoint: &Checkpoint) -> WorkflowResult<()>;

    /// Load the checkpoint of a run
    async fn load(&self, run_id: &str) -> WorkflowResult<Option<Checkpoint>>;

    /// Find the checkpoint holding a pending review for `token`
    async fn find_by_token(&self, token: &ResumeToken) -> WorkflowResult<Option<Checkpoint>>;

    /// Delete the checkpoint of a run; deleting a missing run is not an error
    async fn delete(&self, run_id: &str) -> WorkflowResult<()>;

    /// All stored checkpoints, oldest first
    async fn list(&self) -> WorkflowResult<Vec<Checkpoint>>;
}
