//! Graph-based Workflow Orchestration
//!
//! Concrete implementations of the `trellis_kernel::workflow` contracts:
//! - merge-policy reducers and the per-run [`StateStore`]
//! - the [`StateGraphImpl`] builder and [`CompiledGraphImpl`] executor
//! - closure-backed nodes and the human review wrapper
//! - in-memory and file-backed checkpoint stores

mod checkpoint;
mod node;
mod reducers;
mod review;
mod state_graph;
mod state_store;

pub use checkpoint::*;
pub use node::*;
pub use reducers::*;
pub use review::*;
pub use state_graph::*;
pub use state_store::*;
