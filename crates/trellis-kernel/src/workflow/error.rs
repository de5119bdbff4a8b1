//! Workflow error taxonomy
//!
//! Every failure that ends a run is one of the tagged variants below. Node
//! bodies raise the untagged [`WorkflowError::Execution`]; the executor tags it
//! with the node name and generation before surfacing it to the caller.

use thiserror::Error;

/// Result alias used by every engine API.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Workflow error type
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A node's own logic failed (e.g. the generation service errored)
    #[error("node '{node}' failed{}: {message}", generation_suffix(.generation))]
    NodeBody {
        node: String,
        generation: Option<u64>,
        message: String,
    },

    /// A conditional edge produced no label, or a label with no branch
    #[error(
        "routing error after node '{node}'{}{}: {message}",
        generation_suffix(.generation),
        label_suffix(.label)
    )]
    Routing {
        node: String,
        generation: Option<u64>,
        label: Option<String>,
        message: String,
    },

    /// A partial update violated the state schema
    #[error(
        "merge error on field '{field}'{}{}: {message}",
        node_suffix(.node),
        generation_suffix(.generation)
    )]
    Merge {
        node: Option<String>,
        generation: Option<u64>,
        field: String,
        message: String,
    },

    /// A resume response did not fit the review request
    #[error(
        "interrupt protocol error at node '{node}'{}: {message}",
        generation_suffix(.generation)
    )]
    InterruptProtocol {
        node: String,
        generation: Option<u64>,
        message: String,
    },

    /// Graph structure is invalid
    #[error("graph validation failed: {0}")]
    ValidationFailed(String),

    /// Node, run or resumption token not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Checkpoint store failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The run exceeded its step budget
    #[error("recursion limit of {limit} steps reached")]
    RecursionLimit { limit: u32 },

    /// Untagged failure raised by a node body
    #[error("{0}")]
    Execution(String),
}

fn generation_suffix(generation: &Option<u64>) -> String {
    generation
        .map(|g| format!(" in generation {}", g))
        .unwrap_or_default()
}

fn label_suffix(label: &Option<String>) -> String {
    label
        .as_ref()
        .map(|l| format!(" (label '{}')", l))
        .unwrap_or_default()
}

fn node_suffix(node: &Option<String>) -> String {
    node.as_ref()
        .map(|n| format!(" from node '{}'", n))
        .unwrap_or_default()
}

impl WorkflowError {
    /// Untagged node-body failure
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Routing failure for a node
    pub fn routing(
        node: impl Into<String>,
        label: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Routing {
            node: node.into(),
            generation: None,
            label,
            message: message.into(),
        }
    }

    /// Merge failure for a field
    pub fn merge(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Merge {
            node: None,
            generation: None,
            field: field.into(),
            message: message.into(),
        }
    }

    /// Interrupt protocol failure for a node
    pub fn interrupt_protocol(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InterruptProtocol {
            node: node.into(),
            generation: None,
            message: message.into(),
        }
    }

    /// Attach the failing node and generation.
    ///
    /// Untagged errors become [`WorkflowError::NodeBody`]. Routing, merge and
    /// interrupt protocol errors keep what they already carry and fill in a
    /// missing node or generation. Other errors are returned as is.
    pub fn at_node(self, node: &str, generation: Option<u64>) -> Self {
        match self {
            Self::Execution(message) | Self::Serialization(message) => Self::NodeBody {
                node: node.to_string(),
                generation,
                message,
            },
            Self::Routing {
                node: tagged,
                generation: own,
                label,
                message,
            } => Self::Routing {
                node: tagged,
                generation: own.or(generation),
                label,
                message,
            },
            Self::Merge {
                node: tagged,
                generation: own,
                field,
                message,
            } => Self::Merge {
                node: tagged.or_else(|| Some(node.to_string())),
                generation: own.or(generation),
                field,
                message,
            },
            Self::InterruptProtocol {
                node: tagged,
                generation: own,
                message,
            } => Self::InterruptProtocol {
                node: tagged,
                generation: own.or(generation),
                message,
            },
            other => other,
        }
    }

    /// The node this error is attributed to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::NodeBody { node, .. }
            | Self::Routing { node, .. }
            | Self::InterruptProtocol { node, .. } => Some(node),
            Self::Merge { node, .. } => node.as_deref(),
            _ => None,
        }
    }

    /// The generation this error is attributed to, if any
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::NodeBody { generation, .. }
            | Self::Routing { generation, .. }
            | Self::Merge { generation, .. }
            | Self::InterruptProtocol { generation, .. } => *generation,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::Checkpoint(err.to_string())
    }
}
