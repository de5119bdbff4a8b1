//! Trellis Foundation
//!
//! Concrete engine for the graph contracts in `trellis-kernel`: the
//! [`workflow::StateGraphImpl`] builder and its executor, checkpoint stores,
//! text-generation clients, and the reference report and triage workflows.

// workflow module - executor, state store, checkpoints
pub mod workflow;

// llm module - text-generation clients
pub mod llm;

// workflows module - reference report and triage graphs
pub mod workflows;
