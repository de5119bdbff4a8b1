//! Workflow Module
//!
//! Core workflow/graph abstractions for Trellis. A run threads one state
//! record through a directed graph of nodes, with support for:
//!
//! - **Merge policies**: per-field overwrite / append semantics
//! - **Command pattern**: unified state updates and control flow
//! - **Fan-out**: dynamic worker dispatch joined by a barrier
//! - **Review**: suspending a node until a reviewer answers
//! - **RemainingSteps**: active recursion limit tracking
//!
//! # Architecture
//!
//! This module defines contracts only (kernel layer). Concrete implementations
//! are provided in `trellis-foundation`.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_kernel::workflow::{StateGraph, CompiledGraph, START, END};
//!
//! let mut graph = StateGraphImpl::<JsonState>::new("echo");
//! graph
//!     .add_node("process", Box::new(ProcessNode))
//!     .add_edge(START, "process")
//!     .add_edge("process", END);
//! let compiled = graph.compile()?;
//!
//! let outcome = compiled.invoke(JsonState::new(), None).await?;
//! ```

pub mod checkpoint;
pub mod command;
pub mod context;
pub mod error;
pub mod event;
pub mod graph;
pub mod reducer;
pub mod review;
pub mod state;

// Re-export public API
pub use checkpoint::{Checkpoint, CheckpointStore, Cursor, GenerationCheckpoint, Slot};
pub use command::{Command, ControlFlow, SendCommand};
pub use context::{BranchInfo, GraphConfig, RemainingSteps, RuntimeContext};
pub use error::{WorkflowError, WorkflowResult};
pub use event::ExecutionEvent;
pub use graph::{
    CompiledGraph, ConditionalEdge, EdgeTarget, FanOutEdge, FanOutFn, LabelNormalizer, NodeFunc,
    RouteFn, RunOutcome, StateGraph, END, START,
};
pub use reducer::{Reducer, ReducerType, StateUpdate};
pub use review::{PendingReview, ResponseKind, ResumeToken, ReviewRequest, ReviewResponse, Suspension};
pub use state::{GraphState, JsonState, StateField, StateSchema};
