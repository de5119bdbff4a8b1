//! Human review wrapper
//!
//! [`HumanReviewNode`] puts any node behind a reviewer. On first invocation it
//! suspends the run with a review request whose args are read from the
//! state's `input_key`. When the run is resumed the wrapped body runs as is
//! (accept), runs over edited args (edit), or is skipped in favour of the
//! reviewer's text (respond).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use trellis_kernel::workflow::{
    Command, GraphState, NodeFunc, ResponseKind, ReviewRequest, ReviewResponse, RuntimeContext,
    WorkflowError, WorkflowResult,
};

/// Wraps a node with human-in-the-loop review
pub struct HumanReviewNode<S: GraphState> {
    inner: Arc<dyn NodeFunc<S>>,
    input_key: String,
    output_key: String,
    description: String,
    allowed: Vec<ResponseKind>,
}

impl<S: GraphState> HumanReviewNode<S> {
    /// Review `inner`, showing the reviewer the value of `input_key`.
    ///
    /// A `respond` answer is written to `output_key`.
    pub fn new(
        inner: Box<dyn NodeFunc<S>>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::from(inner),
            input_key: input_key.into(),
            output_key: output_key.into(),
            description: "Please review the proposed action".to_string(),
            allowed: ResponseKind::all(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<ResponseKind>) -> Self {
        self.allowed = allowed;
        self
    }

    fn request(&self, state: &S) -> ReviewRequest {
        let args = state.get_value(&self.input_key).unwrap_or(Value::Null);
        ReviewRequest::new(self.inner.name(), args)
            .with_description(self.description.clone())
            .with_allowed(self.allowed.clone())
    }
}

#[async_trait]
impl<S: GraphState> NodeFunc<S> for HumanReviewNode<S> {
    async fn call(&self, state: &mut S, ctx: &RuntimeContext) -> WorkflowResult<Command> {
        let Some(response) = ctx.resume_response() else {
            info!(node = self.inner.name(), "requesting review");
            return Ok(Command::interrupt(self.request(state)));
        };

        let kind = response.kind();
        if !self.allowed.contains(&kind) {
            return Err(WorkflowError::interrupt_protocol(
                &ctx.current_node,
                format!("response '{}' is not allowed for this review", kind),
            ));
        }

        let body_ctx = ctx.without_resume();
        match response {
            ReviewResponse::Accept => {
                debug!(node = self.inner.name(), "review accepted");
                self.inner.call(state, &body_ctx).await
            }
            ReviewResponse::Edit { args } => {
                debug!(node = self.inner.name(), "review edited input");
                state
                    .set_value(&self.input_key, args.clone())
                    .map_err(|e| {
                        WorkflowError::interrupt_protocol(
                            &ctx.current_node,
                            format!("edited args do not fit '{}': {}", self.input_key, e),
                        )
                    })?;
                self.inner.call(state, &body_ctx).await
            }
            ReviewResponse::Respond { .. } => {
                debug!(node = self.inner.name(), "review answered directly");
                let text = response.respond_text().unwrap_or_default();
                Ok(Command::new().update(self.output_key.clone(), Value::String(text)))
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> Option<&str> {
        self.inner.description()
    }
}
