//! Closure-backed nodes

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use trellis_kernel::workflow::{Command, GraphState, NodeFunc, RuntimeContext, WorkflowResult};

/// Adapts an async closure into a [`NodeFunc`]
///
/// The closure receives an owned copy of the state and context.
///
/// # Example
///
/// ```rust,ignore
/// let node = FnNode::new("synthesizer", |state: ReportState, _ctx| async move {
///     Ok(Command::new().update("final_report", json!(state.completed_sections.join("\n"))))
/// });
/// ```
pub struct FnNode<S, F> {
    name: String,
    description: Option<String>,
    func: F,
    _state: PhantomData<fn() -> S>,
}

impl<S, F, Fut> FnNode<S, F>
where
    S: GraphState,
    F: Fn(S, RuntimeContext) -> Fut + Send + Sync,
    Fut: Future<Output = WorkflowResult<Command>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            description: None,
            func,
            _state: PhantomData,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Box the node for registration
    pub fn boxed(self) -> Box<dyn NodeFunc<S>>
    where
        F: 'static,
    {
        Box::new(self)
    }
}

#[async_trait]
impl<S, F, Fut> NodeFunc<S> for FnNode<S, F>
where
    S: GraphState,
    F: Fn(S, RuntimeContext) -> Fut + Send + Sync,
    Fut: Future<Output = WorkflowResult<Command>> + Send,
{
    async fn call(&self, state: &mut S, ctx: &RuntimeContext) -> WorkflowResult<Command> {
        (self.func)(state.clone(), ctx.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
