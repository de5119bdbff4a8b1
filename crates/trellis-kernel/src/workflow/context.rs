//! Runtime Context for Workflow Execution
//!
//! Provides runtime information and configuration for workflow execution,
//! including recursion limit tracking, fan-out branch position, and the
//! reviewer response when a suspended node is re-invoked.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ReviewResponse;

/// Remaining steps tracker for recursion limit
///
/// Tracks and manages the remaining execution steps to prevent infinite loops.
/// This is actively decremented during execution and can be checked by nodes.
///
/// # Example
///
/// ```rust,ignore
/// let remaining = RemainingSteps::new(100);
///
/// if remaining.is_exhausted().await {
///     return Err(WorkflowError::RecursionLimit { limit: remaining.max() });
/// }
///
/// remaining.decrement().await;
/// ```
#[derive(Debug, Clone)]
pub struct RemainingSteps {
    current: Arc<RwLock<u32>>,
    max: u32,
}

impl RemainingSteps {
    /// Create a new remaining steps tracker
    pub fn new(max: u32) -> Self {
        Self {
            current: Arc::new(RwLock::new(max)),
            max,
        }
    }

    /// Tracker with `used` steps already consumed (restored runs)
    pub fn with_used(max: u32, used: u32) -> Self {
        Self {
            current: Arc::new(RwLock::new(max.saturating_sub(used))),
            max,
        }
    }

    /// Get the current remaining steps
    pub async fn current(&self) -> u32 {
        *self.current.read().await
    }

    /// Get the maximum steps allowed
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Steps consumed so far
    pub async fn used(&self) -> u32 {
        self.max - *self.current.read().await
    }

    /// Decrement the remaining steps by one
    pub async fn decrement(&self) -> u32 {
        let mut current = self.current.write().await;
        if *current > 0 {
            *current -= 1;
        }
        *current
    }

    /// Check if steps are exhausted
    pub async fn is_exhausted(&self) -> bool {
        *self.current.read().await == 0
    }
}

/// Graph execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of node steps per run
    pub max_steps: u32,

    /// Maximum concurrently running workers in one generation
    pub max_parallelism: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_parallelism: 10,
        }
    }
}

impl GraphConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum recursion depth
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set maximum parallelism
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max;
        self
    }

    /// Create RemainingSteps from this config
    pub fn remaining_steps(&self) -> RemainingSteps {
        RemainingSteps::new(self.max_steps)
    }
}

/// Position of a worker invocation inside a fan-out generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub generation: u64,
    pub index: usize,
}

/// Runtime context passed to node functions
///
/// Contains non-state information about the current execution: run ID,
/// current node, remaining steps, branch position and, when a suspended node
/// is re-invoked, the reviewer's response.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// Unique run ID
    pub execution_id: String,

    /// Graph ID
    pub graph_id: String,

    /// Node currently executing
    pub current_node: String,

    /// Remaining steps tracker
    pub remaining_steps: RemainingSteps,

    /// Graph configuration
    pub config: GraphConfig,

    /// Set for fan-out worker invocations
    pub branch: Option<BranchInfo>,

    /// Reviewer response delivered on resume
    pub resume: Option<ReviewResponse>,
}

impl RuntimeContext {
    /// Create a new runtime context
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self::with_config(graph_id, GraphConfig::default())
    }

    /// Create a context with a specific config
    pub fn with_config(graph_id: impl Into<String>, config: GraphConfig) -> Self {
        let remaining_steps = config.remaining_steps();
        Self {
            execution_id: Uuid::new_v4().to_string(),
            graph_id: graph_id.into(),
            current_node: String::new(),
            remaining_steps,
            config,
            branch: None,
            resume: None,
        }
    }

    /// Context for a run restored from a checkpoint
    pub fn restored(
        graph_id: impl Into<String>,
        execution_id: impl Into<String>,
        config: GraphConfig,
        steps_used: u32,
    ) -> Self {
        let remaining_steps = RemainingSteps::with_used(config.max_steps, steps_used);
        Self {
            execution_id: execution_id.into(),
            remaining_steps,
            ..Self::with_config(graph_id, config)
        }
    }

    /// Derive the context handed to a main-path node
    pub fn for_node(&self, node_id: &str) -> Self {
        Self {
            current_node: node_id.to_string(),
            branch: None,
            resume: None,
            ..self.clone()
        }
    }

    /// Derive the context handed to a fan-out worker
    pub fn for_worker(&self, node_id: &str, generation: u64, index: usize) -> Self {
        Self {
            current_node: node_id.to_string(),
            branch: Some(BranchInfo { generation, index }),
            resume: None,
            ..self.clone()
        }
    }

    /// Attach the reviewer response for a re-invoked node
    pub fn with_resume(mut self, response: ReviewResponse) -> Self {
        self.resume = Some(response);
        self
    }

    /// Same context with any reviewer response removed
    pub fn without_resume(&self) -> Self {
        Self {
            resume: None,
            ..self.clone()
        }
    }

    /// Reviewer response, if this invocation resumes a suspended node
    pub fn resume_response(&self) -> Option<&ReviewResponse> {
        self.resume.as_ref()
    }

    /// Generation of this invocation, if it is a fan-out worker
    pub fn generation(&self) -> Option<u64> {
        self.branch.map(|b| b.generation)
    }

    /// Check if recursion limit is reached
    pub async fn is_recursion_limit_reached(&self) -> bool {
        self.remaining_steps.is_exhausted().await
    }

    /// Decrement remaining steps
    pub async fn decrement_steps(&self) -> u32 {
        self.remaining_steps.decrement().await
    }
}
