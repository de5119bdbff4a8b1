//! Command Pattern for Workflow Control
//!
//! A node returns a [`Command`]: the partial state update it produced plus a
//! control-flow directive for the executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ReviewRequest, StateUpdate};

/// Control flow directive for workflow execution
///
/// Determines what happens after a node completes execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[non_exhaustive]
pub enum ControlFlow {
    /// Continue to the next node(s) based on graph edges
    #[default]
    Continue,

    /// Jump to a specific node by ID
    Goto(String),

    /// End workflow execution and return current state
    Return,

    /// Fan out to the worker declared on this node's fan-out edge
    Send(Vec<SendCommand>),

    /// Suspend this node until a reviewer answers the request.
    /// Updates carried alongside an interrupt are discarded.
    Interrupt(ReviewRequest),
}

/// Command returned by node functions
///
/// # Example
///
/// ```rust,ignore
/// // Update state and continue to next node
/// let cmd = Command::new()
///     .update("tasks", json!([...]))
///     .continue_();
///
/// // Provide the label a conditional edge should route on
/// let cmd = Command::new()
///     .update("decision", json!("True"))
///     .route("True");
///
/// // Fan out one worker invocation per task
/// let cmd = Command::send(vec![
///     SendCommand::new("llm_call", json!({"task": {...}})),
///     SendCommand::new("llm_call", json!({"task": {...}})),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Command {
    /// State updates to apply
    pub updates: Vec<StateUpdate>,
    /// Optional explicit routing label for conditional edges
    pub route: Option<String>,
    /// Control flow directive
    pub control: ControlFlow,
}

impl Command {
    /// Create a new empty command
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a state update
    pub fn update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.updates.push(StateUpdate::new(key, value));
        self
    }

    /// Add multiple state updates
    pub fn updates(mut self, updates: Vec<StateUpdate>) -> Self {
        self.updates.extend(updates);
        self
    }

    /// Provide an explicit routing label for conditional edges
    pub fn route(mut self, label: impl Into<String>) -> Self {
        self.route = Some(label.into());
        self
    }

    /// Set control flow to continue to next node
    pub fn continue_(mut self) -> Self {
        self.control = ControlFlow::Continue;
        self
    }

    /// Set control flow to jump to a specific node
    pub fn goto(mut self, node: impl Into<String>) -> Self {
        self.control = ControlFlow::Goto(node.into());
        self
    }

    /// Set control flow to end execution
    pub fn return_(mut self) -> Self {
        self.control = ControlFlow::Return;
        self
    }

    /// Fan out to the declared worker, one invocation per request
    pub fn send(targets: Vec<SendCommand>) -> Self {
        Self {
            control: ControlFlow::Send(targets),
            ..Self::default()
        }
    }

    /// Suspend for human review
    pub fn interrupt(request: ReviewRequest) -> Self {
        Self {
            control: ControlFlow::Interrupt(request),
            ..Self::default()
        }
    }

    /// Create a command that just updates state (continues by default)
    pub fn just_update(key: impl Into<String>, value: Value) -> Self {
        Self::new().update(key, value)
    }

    /// Check if this command ends execution
    pub fn is_return(&self) -> bool {
        matches!(self.control, ControlFlow::Return)
    }

    /// Check if this command fans out
    pub fn is_send(&self) -> bool {
        matches!(self.control, ControlFlow::Send(_))
    }

    /// Check if this command suspends the node
    pub fn is_interrupt(&self) -> bool {
        matches!(self.control, ControlFlow::Interrupt(_))
    }

    /// Get the target node if this is a goto command
    pub fn goto_target(&self) -> Option<&str> {
        match &self.control {
            ControlFlow::Goto(target) => Some(target),
            _ => None,
        }
    }

    /// Get the explicit routing label if set
    pub fn route_value(&self) -> Option<&str> {
        self.route.as_deref()
    }
}

/// Dispatch request for one fan-out worker invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCommand {
    /// Worker node ID
    pub target: String,
    /// Worker input, deserialized into the worker state type
    pub input: Value,
}

impl SendCommand {
    /// Create a new send command
    pub fn new(target: impl Into<String>, input: Value) -> Self {
        Self {
            target: target.into(),
            input,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ResponseKind;
    use serde_json::json;

    #[test]
    fn test_command_builder() {
        let cmd = Command::new()
            .update("key1", json!("value1"))
            .update("key2", json!(42))
            .goto("next_node");

        assert_eq!(cmd.updates.len(), 2);
        assert_eq!(cmd.updates[0].key, "key1");
        assert_eq!(cmd.goto_target(), Some("next_node"));
    }

    #[test]
    fn test_command_route_value() {
        let cmd = Command::new()
            .update("decision", json!("True"))
            .route("True")
            .continue_();

        assert_eq!(cmd.route_value(), Some("True"));
        assert_eq!(cmd.control, ControlFlow::Continue);
    }

    #[test]
    fn test_command_return() {
        let cmd = Command::new().update("final_report", json!("done")).return_();
        assert!(cmd.is_return());
        assert!(!cmd.is_send());
    }

    #[test]
    fn test_command_send() {
        let cmd = Command::send(vec![
            SendCommand::new("worker", json!({"task": 1})),
            SendCommand::new("worker", json!({"task": 2})),
        ]);

        assert!(cmd.is_send());
        if let ControlFlow::Send(targets) = &cmd.control {
            assert_eq!(targets.len(), 2);
            assert_eq!(targets[1].input, json!({"task": 2}));
        } else {
            panic!("Expected Send control flow");
        }
    }

    #[test]
    fn test_command_interrupt() {
        let request = ReviewRequest::new("book_table", json!({"party": 2}))
            .with_allowed(vec![ResponseKind::Accept]);
        let cmd = Command::interrupt(request.clone());
        assert!(cmd.is_interrupt());
        assert_eq!(cmd.control, ControlFlow::Interrupt(request));
    }
}
