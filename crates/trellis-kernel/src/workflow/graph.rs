//! State Graph Traits
//!
//! Defines the core graph interfaces for building and executing workflows:
//! node functions, edge kinds with their routing rules, and the builder and
//! compiled-graph contracts implemented in `trellis-foundation`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    Command, GraphConfig, GraphState, ResumeToken, ReviewResponse, RuntimeContext, SendCommand,
    StateSchema, Suspension, WorkflowError, WorkflowResult,
};

/// Special node ID for the graph entry point
pub const START: &str = "__START__";

/// Special node ID for the graph exit point
pub const END: &str = "__END__";

/// Node function trait
///
/// Implement this trait to define custom node behavior.
/// Nodes receive a private copy of the current state and the runtime context,
/// and return a Command carrying the partial update and control flow.
///
/// # Example
///
/// ```rust,ignore
/// struct Classify;
///
/// #[async_trait]
/// impl NodeFunc<MailState> for Classify {
///     async fn call(&self, state: &mut MailState, _ctx: &RuntimeContext) -> WorkflowResult<Command> {
///         let label = if state.body.contains("unsubscribe") { "False" } else { "True" };
///         Ok(Command::new().update("decision", json!(label)).route(label))
///     }
///
///     fn name(&self) -> &str {
///         "classify"
///     }
/// }
/// ```
#[async_trait]
pub trait NodeFunc<S: GraphState>: Send + Sync {
    /// Execute the node
    ///
    /// # Arguments
    /// * `state` - Private copy of the current state; mutations are discarded
    /// * `ctx` - Runtime context with execution metadata
    ///
    /// # Returns
    /// A Command containing state updates and control flow directive
    async fn call(&self, state: &mut S, ctx: &RuntimeContext) -> WorkflowResult<Command>;

    /// Returns the node name/identifier
    fn name(&self) -> &str;

    /// Optional description of what this node does
    fn description(&self) -> Option<&str> {
        None
    }
}

/// Label-producing function of a conditional edge
pub type RouteFn<S> = Arc<dyn Fn(&S) -> Option<String> + Send + Sync>;

/// Request-producing function of a fan-out edge
pub type FanOutFn<S> = Arc<dyn Fn(&S) -> WorkflowResult<Vec<SendCommand>> + Send + Sync>;

/// Normalisation applied to routing labels and to branch-table keys alike
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelNormalizer {
    /// Labels must match byte for byte
    #[default]
    Exact,
    /// ASCII case is ignored
    CaseInsensitive,
    /// Surrounding whitespace is ignored
    Trimmed,
    /// Surrounding whitespace and ASCII case are ignored
    TrimmedCaseInsensitive,
}

impl LabelNormalizer {
    pub fn normalize(&self, label: &str) -> String {
        match self {
            LabelNormalizer::Exact => label.to_string(),
            LabelNormalizer::CaseInsensitive => label.to_ascii_lowercase(),
            LabelNormalizer::Trimmed => label.trim().to_string(),
            LabelNormalizer::TrimmedCaseInsensitive => label.trim().to_ascii_lowercase(),
        }
    }
}

/// Conditional edge: a branch table keyed by a computed label
pub struct ConditionalEdge<S> {
    routes: HashMap<String, String>,
    normalizer: LabelNormalizer,
    label_fn: Option<RouteFn<S>>,
}

impl<S> Clone for ConditionalEdge<S> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            normalizer: self.normalizer,
            label_fn: self.label_fn.clone(),
        }
    }
}

impl<S> fmt::Debug for ConditionalEdge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("routes", &self.routes)
            .field("normalizer", &self.normalizer)
            .field("label_fn", &self.label_fn.is_some())
            .finish()
    }
}

impl<S> ConditionalEdge<S> {
    /// Branch table with exact label matching and labels taken from
    /// [`Command::route`]
    pub fn new<K, V>(routes: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            routes: routes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            normalizer: LabelNormalizer::Exact,
            label_fn: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: LabelNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Compute the label from the post-merge state when the node gives none
    pub fn with_label_fn(mut self, label_fn: impl Fn(&S) -> Option<String> + Send + Sync + 'static) -> Self {
        self.label_fn = Some(Arc::new(label_fn));
        self
    }

    pub fn routes(&self) -> &HashMap<String, String> {
        &self.routes
    }

    pub fn normalizer(&self) -> LabelNormalizer {
        self.normalizer
    }

    /// Normalise every table key once.
    ///
    /// Two keys that normalise to the same label are a validation error.
    pub fn normalized(self, from: &str) -> WorkflowResult<Self> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (label, target) in self.routes {
            let key = self.normalizer.normalize(&label);
            if routes.insert(key.clone(), target).is_some() {
                return Err(WorkflowError::ValidationFailed(format!(
                    "conditional edge from '{}' has two labels normalising to '{}'",
                    from, key
                )));
            }
        }
        Ok(Self { routes, ..self })
    }

    /// Resolve the target of this edge.
    ///
    /// The node's explicit label wins over the edge's label function. A missing
    /// or unmapped label is a routing error; there is no default branch.
    pub fn resolve(&self, from: &str, explicit: Option<&str>, state: &S) -> WorkflowResult<String> {
        let label = match explicit {
            Some(label) => label.to_string(),
            None => match self.label_fn.as_ref().and_then(|f| f(state)) {
                Some(label) => label,
                None => {
                    return Err(WorkflowError::routing(
                        from,
                        None,
                        "conditional edge produced no label",
                    ));
                }
            },
        };

        let key = self.normalizer.normalize(&label);
        self.routes.get(&key).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = self.routes.keys().map(String::as_str).collect();
            known.sort_unstable();
            WorkflowError::routing(
                from,
                Some(label),
                format!("label has no branch (known: {})", known.join(", ")),
            )
        })
    }
}

/// Fan-out edge: dispatches one worker invocation per request
pub struct FanOutEdge<S> {
    worker: String,
    requests: Option<FanOutFn<S>>,
}

impl<S> Clone for FanOutEdge<S> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<S> fmt::Debug for FanOutEdge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutEdge")
            .field("worker", &self.worker)
            .field("requests", &self.requests.is_some())
            .finish()
    }
}

impl<S> FanOutEdge<S> {
    /// Fan out to `worker`; requests come from the node's [`Command::send`]
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            requests: None,
        }
    }

    /// Derive the requests from the post-merge state instead
    pub fn with_requests(
        mut self,
        requests: impl Fn(&S) -> WorkflowResult<Vec<SendCommand>> + Send + Sync + 'static,
    ) -> Self {
        self.requests = Some(Arc::new(requests));
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Requests computed from state, if this edge has a request function
    pub fn requests_for(&self, state: &S) -> Option<WorkflowResult<Vec<SendCommand>>> {
        self.requests.as_ref().map(|f| f(state))
    }
}

/// Edge target definition
#[non_exhaustive]
pub enum EdgeTarget<S> {
    /// Single target node (or END)
    Single(String),
    /// Branch table keyed by a computed label
    Conditional(ConditionalEdge<S>),
    /// Dynamic fan-out to a worker node
    FanOut(FanOutEdge<S>),
}

impl<S> Clone for EdgeTarget<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Single(t) => Self::Single(t.clone()),
            Self::Conditional(c) => Self::Conditional(c.clone()),
            Self::FanOut(f) => Self::FanOut(f.clone()),
        }
    }
}

impl<S> fmt::Debug for EdgeTarget<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(t) => f.debug_tuple("Single").field(t).finish(),
            Self::Conditional(c) => f.debug_tuple("Conditional").field(c).finish(),
            Self::FanOut(o) => f.debug_tuple("FanOut").field(o).finish(),
        }
    }
}

impl<S> EdgeTarget<S> {
    /// Create a single target edge
    pub fn single(target: impl Into<String>) -> Self {
        Self::Single(target.into())
    }

    /// Check if this is a conditional edge
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::Conditional(_))
    }

    /// Get all target node IDs
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Single(t) => vec![t],
            Self::Conditional(c) => {
                let mut targets: Vec<&str> = c.routes.values().map(String::as_str).collect();
                targets.sort_unstable();
                targets.dedup();
                targets
            }
            Self::FanOut(o) => vec![o.worker.as_str()],
        }
    }
}

/// Result of driving a run until it completes or suspends
#[derive(Debug, Clone)]
pub enum RunOutcome<S> {
    /// The run reached END
    Completed { run_id: String, state: S },
    /// The run is waiting on one or more reviewers
    Suspended(Suspension),
}

impl<S> RunOutcome<S> {
    pub fn run_id(&self) -> &str {
        match self {
            Self::Completed { run_id, .. } => run_id,
            Self::Suspended(s) => &s.run_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Final state of a completed run
    pub fn into_state(self) -> Option<S> {
        match self {
            Self::Completed { state, .. } => Some(state),
            Self::Suspended(_) => None,
        }
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Self::Suspended(s) => Some(s),
            Self::Completed { .. } => None,
        }
    }
}

/// State graph builder trait
///
/// Main-path nodes operate on `State`; fan-out workers operate on the sliced
/// `Worker` state. Node names are unique across both.
///
/// # Example
///
/// ```rust,ignore
/// let mut graph = StateGraphImpl::<ReportState, WorkerState>::new("report");
/// graph
///     .add_node("orchestrator", Box::new(Orchestrator::new(generator.clone())))
///     .add_worker("llm_call", Box::new(SectionWriter::new(generator.clone())))
///     .add_node("synthesizer", Box::new(Synthesizer))
///     .add_edge(START, "orchestrator")
///     .add_fan_out("orchestrator", FanOutEdge::new("llm_call").with_requests(assign_workers))
///     .add_edge("llm_call", "synthesizer")
///     .add_edge("synthesizer", END);
/// let compiled = graph.compile()?;
/// ```
pub trait StateGraph: Send + Sync {
    /// The state type for main-path nodes
    type State: GraphState;

    /// The state type for fan-out workers
    type Worker: GraphState;

    /// The compiled graph type produced by this builder
    type Compiled: CompiledGraph<Self::State>;

    /// Create a new graph with the given ID
    fn new(id: impl Into<String>) -> Self;

    /// Add a main-path node
    fn add_node(&mut self, id: impl Into<String>, node: Box<dyn NodeFunc<Self::State>>) -> &mut Self;

    /// Add a fan-out worker node
    fn add_worker(&mut self, id: impl Into<String>, node: Box<dyn NodeFunc<Self::Worker>>) -> &mut Self;

    /// Add a fixed edge (use START / END for entry and exit)
    fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self;

    /// Add a conditional edge from a node
    fn add_conditional_edges(
        &mut self,
        from: impl Into<String>,
        edge: ConditionalEdge<Self::State>,
    ) -> &mut Self;

    /// Add a fan-out edge from a node
    fn add_fan_out(&mut self, from: impl Into<String>, edge: FanOutEdge<Self::State>) -> &mut Self;

    /// Set the entry point (equivalent to add_edge(START, node))
    fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self;

    /// Set a finish point (equivalent to add_edge(node, END))
    fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self;

    /// Set the graph configuration
    fn with_config(&mut self, config: GraphConfig) -> &mut Self;

    /// Get the graph ID
    fn id(&self) -> &str;

    /// Validate the graph structure and freeze it for execution
    fn compile(self) -> WorkflowResult<Self::Compiled>;
}

/// Compiled graph trait for execution
#[async_trait]
pub trait CompiledGraph<S: GraphState>: Send + Sync {
    /// Get the graph ID
    fn id(&self) -> &str;

    /// Run the graph from its entry point
    ///
    /// # Arguments
    /// * `input` - Initial state
    /// * `config` - Optional runtime context (a fresh one is created if None)
    async fn invoke(&self, input: S, config: Option<RuntimeContext>) -> WorkflowResult<RunOutcome<S>>;

    /// Deliver one reviewer response to a suspended run
    async fn resume(&self, token: &ResumeToken, response: ReviewResponse) -> WorkflowResult<RunOutcome<S>>;

    /// Frozen state schema of this graph
    fn state_schema(&self) -> &StateSchema;
}
