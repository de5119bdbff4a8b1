//! Human review protocol
//!
//! A node wrapped for review suspends the run with a [`ReviewRequest`]. The
//! caller delivers the request to a reviewer and later resumes the run with
//! exactly one [`ReviewResponse`] and the [`ResumeToken`] it was handed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::{WorkflowError, WorkflowResult};

/// Kinds of response a reviewer may give
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Run the wrapped body with the proposed input
    Accept,
    /// Run the wrapped body with reviewer-substituted input
    Edit,
    /// Skip the wrapped body; the reviewer's text is its output
    Respond,
}

impl ResponseKind {
    /// Every response kind
    pub fn all() -> Vec<ResponseKind> {
        vec![ResponseKind::Accept, ResponseKind::Edit, ResponseKind::Respond]
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::Accept => write!(f, "accept"),
            ResponseKind::Edit => write!(f, "edit"),
            ResponseKind::Respond => write!(f, "respond"),
        }
    }
}

/// Review request emitted when a node suspends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Name of the action under review (the wrapped node)
    pub action: String,
    /// Proposed input of the action
    pub args: Value,
    /// Human-readable description
    pub description: String,
    /// Responses the reviewer may give
    pub allowed_responses: Vec<ResponseKind>,
}

impl ReviewRequest {
    /// Create a request allowing every response kind
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            action: action.into(),
            args,
            description: "Please review the proposed action".to_string(),
            allowed_responses: ResponseKind::all(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<ResponseKind>) -> Self {
        self.allowed_responses = allowed;
        self
    }

    /// Whether `kind` is an allowed response
    pub fn allows(&self, kind: ResponseKind) -> bool {
        self.allowed_responses.contains(&kind)
    }
}

/// Reviewer's answer to a [`ReviewRequest`]
///
/// Wire form is `{"type": "accept" | "edit" | "respond", "args": ...}`;
/// `"response"` is accepted as an alias of `"respond"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReviewResponse {
    Accept,
    Edit {
        args: Value,
    },
    #[serde(alias = "response")]
    Respond {
        args: Value,
    },
}

impl ReviewResponse {
    /// Reviewer-provided text response
    pub fn respond(text: impl Into<String>) -> Self {
        Self::Respond {
            args: Value::String(text.into()),
        }
    }

    /// Reviewer-substituted input
    pub fn edit(args: Value) -> Self {
        Self::Edit { args }
    }

    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Accept => ResponseKind::Accept,
            Self::Edit { .. } => ResponseKind::Edit,
            Self::Respond { .. } => ResponseKind::Respond,
        }
    }

    /// Parse a wire response for `node`.
    ///
    /// An unknown or missing `type` is an interrupt protocol error.
    pub fn from_value(node: &str, value: Value) -> WorkflowResult<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WorkflowError::interrupt_protocol(node, "response has no 'type'"))?;

        serde_json::from_value(value).map_err(|e| {
            WorkflowError::interrupt_protocol(
                node,
                format!("unsupported interrupt response type '{}': {}", kind, e),
            )
        })
    }

    /// Text of a `respond` answer, verbatim for strings
    pub fn respond_text(&self) -> Option<String> {
        match self {
            Self::Respond { args: Value::String(text) } => Some(text.clone()),
            Self::Respond { args } => Some(args.to_string()),
            _ => None,
        }
    }
}

/// Opaque handle that resumes one suspended node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Fresh random token
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ResumeToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResumeToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ResumeToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One suspended node awaiting a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    pub token: ResumeToken,
    /// Suspended node
    pub node: String,
    /// Generation and slot when the node is a fan-out worker
    pub generation: Option<u64>,
    pub index: Option<usize>,
    pub request: ReviewRequest,
}

/// Returned by the executor when a run is suspended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub run_id: String,
    pub graph_id: String,
    /// Every review still awaiting a response, in slot order
    pub pending: Vec<PendingReview>,
}

impl Suspension {
    pub fn tokens(&self) -> Vec<&ResumeToken> {
        self.pending.iter().map(|p| &p.token).collect()
    }
}
