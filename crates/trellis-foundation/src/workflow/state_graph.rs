//! StateGraph Implementation
//!
//! Builder and executor for stateful workflow graphs. The executor walks the
//! graph one main-path node at a time; a fan-out edge dispatches a generation
//! of concurrent worker invocations whose outputs are merged in dispatch order
//! once every worker of the generation has finished. A node that asks for
//! review suspends the run into a checkpoint until a response is delivered.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, warn};
use trellis_kernel::workflow::{
    Checkpoint, CheckpointStore, Command, CompiledGraph, ConditionalEdge, ControlFlow, Cursor,
    END, EdgeTarget, ExecutionEvent, FanOutEdge, GenerationCheckpoint, GraphConfig, GraphState,
    NodeFunc, PendingReview, ResumeToken, ReviewRequest, ReviewResponse, RunOutcome,
    RuntimeContext, START, SendCommand, Slot, StateGraph, StateSchema, StateUpdate, Suspension,
    WorkflowError, WorkflowResult,
};

use super::checkpoint::MemoryCheckpointStore;
use super::state_store::StateStore;

/// Type alias for node ID
pub type NodeId = String;

/// StateGraph builder
///
/// `S` is the run state seen by main-path nodes; `W` is the per-invocation
/// state of fan-out workers.
///
/// # Example
///
/// ```rust,ignore
/// use trellis_foundation::workflow::StateGraphImpl;
/// use trellis_kernel::workflow::{StateGraph, FanOutEdge, START, END};
///
/// let mut graph = StateGraphImpl::<ReportState, WorkerState>::build("report");
/// graph
///     .add_node("orchestrator", orchestrator)
///     .add_worker("llm_call", section_writer)
///     .add_node("synthesizer", synthesizer)
///     .add_edge(START, "orchestrator")
///     .add_fan_out("orchestrator", FanOutEdge::new("llm_call").with_requests(assign_workers))
///     .add_edge("llm_call", "synthesizer")
///     .add_edge("synthesizer", END);
/// let compiled = graph.compile()?;
/// ```
pub struct StateGraphImpl<S: GraphState, W: GraphState = S> {
    /// Graph ID
    id: String,
    /// Main-path nodes
    nodes: HashMap<NodeId, Box<dyn NodeFunc<S>>>,
    /// Fan-out workers
    workers: HashMap<NodeId, Box<dyn NodeFunc<W>>>,
    /// Outgoing edge of each node
    edges: HashMap<NodeId, EdgeTarget<S>>,
    /// Entry point (first node after START)
    entry_point: Option<NodeId>,
    /// Graph configuration
    config: GraphConfig,
    /// Where suspended runs are kept
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    /// Optional execution event sink
    events: Option<mpsc::Sender<ExecutionEvent>>,
    /// Structural problems found while building
    problems: Vec<String>,
}

impl<S: GraphState, W: GraphState> StateGraphImpl<S, W> {
    /// Create a new StateGraph builder with the given ID
    pub fn build(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            workers: HashMap::new(),
            edges: HashMap::new(),
            entry_point: None,
            config: GraphConfig::default(),
            checkpoints: None,
            events: None,
            problems: Vec::new(),
        }
    }

    /// Keep suspended runs in `store` (in-memory by default)
    pub fn with_checkpoint_store(&mut self, store: Arc<dyn CheckpointStore>) -> &mut Self {
        self.checkpoints = Some(store);
        self
    }

    /// Send execution events to `sink`.
    ///
    /// Events are dropped when the channel is full.
    pub fn with_event_sink(&mut self, sink: mpsc::Sender<ExecutionEvent>) -> &mut Self {
        self.events = Some(sink);
        self
    }

    /// Get the number of nodes, workers included
    pub fn node_count(&self) -> usize {
        self.nodes.len() + self.workers.len()
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn claim_name(&mut self, node_id: &str) {
        if node_id == START || node_id == END {
            self.problems
                .push(format!("'{}' is reserved and cannot name a node", node_id));
        }
        if self.nodes.contains_key(node_id) || self.workers.contains_key(node_id) {
            self.problems
                .push(format!("Node '{}' is registered twice", node_id));
        }
    }

    fn insert_edge(&mut self, from: String, target: EdgeTarget<S>) {
        debug!("Adding edge from '{}': {:?}", from, target);
        if self.edges.contains_key(&from) {
            self.problems
                .push(format!("Node '{}' has more than one outgoing edge", from));
        }
        self.edges.insert(from, target);
    }

    /// Validate the graph structure
    pub fn validate(&self) -> WorkflowResult<()> {
        let mut errors = self.problems.clone();

        if let Err(e) = S::schema().validate() {
            errors.push(e.to_string());
        }

        // Check entry point
        match &self.entry_point {
            None => errors.push(
                "No entry point set. Use set_entry_point() or add_edge(START, node).".to_string(),
            ),
            Some(entry) if !self.nodes.contains_key(entry) => errors.push(format!(
                "Entry point '{}' is not a main-path node",
                entry
            )),
            Some(_) => {}
        }

        // Check that edges reference valid nodes
        for (from, target) in &self.edges {
            let from_worker = self.workers.contains_key(from);
            if !from_worker && !self.nodes.contains_key(from) {
                errors.push(format!("Edge source '{}' does not exist", from));
            }

            match target {
                EdgeTarget::Single(to) => {
                    if self.workers.contains_key(to) {
                        errors.push(format!(
                            "Worker '{}' can only be reached through a fan-out edge",
                            to
                        ));
                    } else if to != END && !self.nodes.contains_key(to) {
                        errors.push(format!("Edge target '{}' does not exist", to));
                    }
                }
                EdgeTarget::Conditional(edge) => {
                    if from_worker {
                        errors.push(format!("Worker '{}' cannot branch conditionally", from));
                    }
                    for to in edge.routes().values() {
                        if to != END && !self.nodes.contains_key(to) {
                            errors.push(format!("Edge target '{}' does not exist", to));
                        }
                    }
                    if let Err(e) = edge.clone().normalized(from) {
                        errors.push(e.to_string());
                    }
                }
                EdgeTarget::FanOut(edge) => {
                    if from_worker {
                        errors.push(format!("Worker '{}' cannot fan out", from));
                    }
                    if !self.workers.contains_key(edge.worker()) {
                        errors.push(format!(
                            "Fan-out from '{}' targets '{}', which is not a registered worker",
                            from,
                            edge.worker()
                        ));
                    }
                }
                _ => errors.push(format!("Unsupported edge kind from '{}'", from)),
            }
        }

        // Workers route through exactly one fixed edge
        for worker in self.workers.keys() {
            if !matches!(self.edges.get(worker), Some(EdgeTarget::Single(_))) {
                errors.push(format!(
                    "Worker '{}' needs exactly one fixed outgoing edge",
                    worker
                ));
            }
        }

        // Check that all nodes are reachable
        if let Some(entry) = &self.entry_point {
            let reachable = self.find_reachable_nodes(entry);
            for node_id in self.nodes.keys().chain(self.workers.keys()) {
                if !reachable.contains(node_id) {
                    errors.push(format!(
                        "Node '{}' is not reachable from entry point",
                        node_id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(WorkflowError::ValidationFailed(errors.join("; ")))
        }
    }

    /// Find all nodes reachable from a starting node
    fn find_reachable_nodes(&self, start: &str) -> HashSet<String> {
        let mut reachable = HashSet::new();
        let mut stack = vec![start.to_string()];

        while let Some(node_id) = stack.pop() {
            if !reachable.insert(node_id.clone()) {
                continue;
            }
            if let Some(edge_target) = self.edges.get(&node_id) {
                for target in edge_target.targets() {
                    if target != END && !reachable.contains(target) {
                        stack.push(target.to_string());
                    }
                }
            }
        }

        reachable
    }
}

impl<S: GraphState, W: GraphState> StateGraph for StateGraphImpl<S, W> {
    type State = S;
    type Worker = W;
    type Compiled = CompiledGraphImpl<S, W>;

    fn new(id: impl Into<String>) -> Self {
        Self::build(id)
    }

    fn add_node(&mut self, id: impl Into<String>, node: Box<dyn NodeFunc<S>>) -> &mut Self {
        let node_id = id.into();
        debug!("Adding node '{}' to graph '{}'", node_id, self.id);
        self.claim_name(&node_id);
        self.nodes.insert(node_id, node);
        self
    }

    fn add_worker(&mut self, id: impl Into<String>, node: Box<dyn NodeFunc<W>>) -> &mut Self {
        let node_id = id.into();
        debug!("Adding worker '{}' to graph '{}'", node_id, self.id);
        self.claim_name(&node_id);
        self.workers.insert(node_id, node);
        self
    }

    fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        let from_id = from.into();
        let to_id = to.into();

        // Handle START edge (entry point)
        if from_id == START {
            return self.set_entry_point(to_id);
        }

        self.insert_edge(from_id, EdgeTarget::single(to_id));
        self
    }

    fn add_conditional_edges(
        &mut self,
        from: impl Into<String>,
        edge: ConditionalEdge<S>,
    ) -> &mut Self {
        self.insert_edge(from.into(), EdgeTarget::Conditional(edge));
        self
    }

    fn add_fan_out(&mut self, from: impl Into<String>, edge: FanOutEdge<S>) -> &mut Self {
        self.insert_edge(from.into(), EdgeTarget::FanOut(edge));
        self
    }

    fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        let node_id = node.into();
        debug!("Setting entry point to '{}'", node_id);
        self.entry_point = Some(node_id);
        self
    }

    fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.add_edge(node, END)
    }

    fn with_config(&mut self, config: GraphConfig) -> &mut Self {
        self.config = config;
        self
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn compile(self) -> WorkflowResult<CompiledGraphImpl<S, W>> {
        info!("Compiling graph '{}'", self.id);

        self.validate()?;

        let mut edges = HashMap::with_capacity(self.edges.len());
        for (from, target) in self.edges {
            let target = match target {
                EdgeTarget::Conditional(edge) => EdgeTarget::Conditional(edge.normalized(&from)?),
                other => other,
            };
            edges.insert(from, target);
        }

        let entry_point = self
            .entry_point
            .ok_or_else(|| WorkflowError::ValidationFailed("No entry point set".to_string()))?;
        let max_par = self.config.max_parallelism.max(1);

        Ok(CompiledGraphImpl {
            id: self.id,
            nodes: Arc::new(
                self.nodes
                    .into_iter()
                    .map(|(node_id, node)| (node_id, Arc::from(node)))
                    .collect(),
            ),
            workers: Arc::new(
                self.workers
                    .into_iter()
                    .map(|(node_id, node)| (node_id, Arc::from(node)))
                    .collect(),
            ),
            edges: Arc::new(edges),
            entry_point,
            schema: Arc::new(S::schema()),
            config: self.config,
            checkpoints: self
                .checkpoints
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
            events: self.events,
            parallelism_semaphore: Arc::new(Semaphore::new(max_par)),
            resume_lock: Mutex::new(()),
        })
    }
}

/// Compiled graph ready for execution
pub struct CompiledGraphImpl<S: GraphState, W: GraphState = S> {
    /// Graph ID
    id: String,
    /// Main-path nodes
    nodes: Arc<HashMap<NodeId, Arc<dyn NodeFunc<S>>>>,
    /// Fan-out workers
    workers: Arc<HashMap<NodeId, Arc<dyn NodeFunc<W>>>>,
    /// Edges, conditional tables already normalised
    edges: Arc<HashMap<NodeId, EdgeTarget<S>>>,
    /// Entry point
    entry_point: NodeId,
    /// Frozen state schema
    schema: Arc<StateSchema>,
    /// Configuration
    config: GraphConfig,
    /// Suspended runs
    checkpoints: Arc<dyn CheckpointStore>,
    /// Execution event sink
    events: Option<mpsc::Sender<ExecutionEvent>>,
    /// Concurrency semaphore for worker invocations
    parallelism_semaphore: Arc<Semaphore>,
    /// Serialises resumes so sibling tokens never race on one checkpoint
    resume_lock: Mutex<()>,
}

/// One run in progress
struct Run<S: GraphState> {
    ctx: RuntimeContext,
    store: StateStore<S>,
    generation: u64,
}

impl<S: GraphState> Run<S> {
    fn id(&self) -> &str {
        &self.ctx.execution_id
    }
}

/// What the executor does after a step
enum Flow {
    Next(NodeId),
    Suspend(Suspension),
}

/// Result of one worker invocation
enum WorkerOutcome {
    Done(Vec<StateUpdate>),
    Suspended { input: Value, request: ReviewRequest },
}

impl<S: GraphState, W: GraphState> CompiledGraphImpl<S, W> {
    /// Store holding this graph's suspended runs
    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        self.checkpoints.clone()
    }

    /// Reviews awaiting a response across all suspended runs of this graph
    pub async fn pending_reviews(&self) -> WorkflowResult<Vec<PendingReview>> {
        Ok(self
            .checkpoints
            .list()
            .await?
            .into_iter()
            .filter(|cp| cp.graph_id == self.id)
            .flat_map(|cp| cp.pending)
            .collect())
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                debug!("execution event dropped: {}", e);
            }
        }
    }

    /// Walk the graph until END or a suspension
    async fn drive(&self, mut run: Run<S>, mut flow: Flow) -> WorkflowResult<RunOutcome<S>> {
        loop {
            let node_id = match flow {
                Flow::Suspend(suspension) => return Ok(RunOutcome::Suspended(suspension)),
                Flow::Next(node_id) => node_id,
            };

            if node_id == END {
                let run_id = run.ctx.execution_id.clone();
                return Ok(RunOutcome::Completed {
                    run_id,
                    state: run.store.into_state(),
                });
            }

            // Check recursion limit
            if run.ctx.is_recursion_limit_reached().await {
                return Err(WorkflowError::RecursionLimit {
                    limit: run.ctx.remaining_steps.max(),
                });
            }
            run.ctx.decrement_steps().await;

            flow = self.run_node(&mut run, &node_id, None).await?;
        }
    }

    /// Invoke one main-path node and act on its command
    async fn run_node(
        &self,
        run: &mut Run<S>,
        node_id: &str,
        resume: Option<ReviewResponse>,
    ) -> WorkflowResult<Flow> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| WorkflowError::NotFound(format!("Node '{}'", node_id)))?
            .clone();

        debug!(run_id = run.id(), node = node_id, "executing node");
        self.emit(ExecutionEvent::NodeStarted {
            run_id: run.id().to_string(),
            node: node_id.to_string(),
        })
        .await;

        let mut ctx = run.ctx.for_node(node_id);
        if let Some(response) = resume {
            ctx = ctx.with_resume(response);
        }

        // Nodes see a private copy; only their command reaches the store
        let mut scratch = run.store.state().clone();
        let command = node
            .call(&mut scratch, &ctx)
            .await
            .map_err(|e| e.at_node(node_id, None))?;

        self.after_node(run, node_id, command).await
    }

    async fn after_node(
        &self,
        run: &mut Run<S>,
        node_id: &str,
        command: Command,
    ) -> WorkflowResult<Flow> {
        let Command {
            updates,
            route,
            control,
            ..
        } = command;

        if let ControlFlow::Interrupt(request) = control {
            if !updates.is_empty() {
                warn!(node = node_id, "discarding updates returned alongside an interrupt");
            }
            return self.suspend_node(run, node_id, request).await;
        }

        run.store
            .apply_update(&updates)
            .await
            .map_err(|e| e.at_node(node_id, None))?;
        self.emit(ExecutionEvent::NodeCompleted {
            run_id: run.id().to_string(),
            node: node_id.to_string(),
            updated_fields: updates.iter().map(|u| u.key.clone()).collect(),
        })
        .await;

        match control {
            ControlFlow::Continue => self.follow_edge(run, node_id, route.as_deref()).await,
            ControlFlow::Return => Ok(Flow::Next(END.to_string())),
            ControlFlow::Goto(target) => {
                if target != END && !self.nodes.contains_key(&target) {
                    return Err(WorkflowError::routing(
                        node_id,
                        None,
                        format!("goto target '{}' is not a main-path node", target),
                    ));
                }
                debug!(node = node_id, target = %target, "goto");
                Ok(Flow::Next(target))
            }
            ControlFlow::Send(requests) => match self.edges.get(node_id) {
                Some(EdgeTarget::FanOut(edge)) => {
                    self.dispatch(run, node_id, edge.worker(), requests).await
                }
                _ => Err(WorkflowError::routing(
                    node_id,
                    None,
                    "node sent fan-out requests but has no fan-out edge",
                )),
            },
            _ => Err(WorkflowError::routing(
                node_id,
                None,
                "unsupported control flow",
            )),
        }
    }

    /// Router: resolve the outgoing edge of `node_id`
    async fn follow_edge(
        &self,
        run: &mut Run<S>,
        node_id: &str,
        route: Option<&str>,
    ) -> WorkflowResult<Flow> {
        match self.edges.get(node_id) {
            None => Ok(Flow::Next(END.to_string())),
            Some(EdgeTarget::Single(target)) => Ok(Flow::Next(target.clone())),
            Some(EdgeTarget::Conditional(edge)) => {
                let target = edge.resolve(node_id, route, run.store.state())?;
                debug!(node = node_id, target = %target, "conditional edge resolved");
                Ok(Flow::Next(target))
            }
            Some(EdgeTarget::FanOut(edge)) => {
                let requests = match edge.requests_for(run.store.state()) {
                    Some(requests) => requests.map_err(|e| e.at_node(node_id, None))?,
                    None => {
                        return Err(WorkflowError::routing(
                            node_id,
                            None,
                            "fan-out edge has no request function and the node sent no requests",
                        ));
                    }
                };
                self.dispatch(run, node_id, edge.worker(), requests).await
            }
            Some(_) => Err(WorkflowError::routing(node_id, None, "unsupported edge kind")),
        }
    }

    /// Fan-out dispatcher: start one generation of `worker`
    async fn dispatch(
        &self,
        run: &mut Run<S>,
        from: &str,
        worker: &str,
        requests: Vec<SendCommand>,
    ) -> WorkflowResult<Flow> {
        if let Some(stray) = requests.iter().find(|r| r.target != worker) {
            return Err(WorkflowError::routing(
                from,
                None,
                format!(
                    "send target '{}' is not the fan-out worker '{}'",
                    stray.target, worker
                ),
            ));
        }

        run.generation += 1;
        let generation = run.generation;
        let size = requests.len();

        info!(run_id = run.id(), generation, worker, size, "dispatching generation");
        self.emit(ExecutionEvent::GenerationDispatched {
            run_id: run.id().to_string(),
            generation,
            worker: worker.to_string(),
            size,
        })
        .await;

        let jobs = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| (index, request.input, None))
            .collect();
        let outcomes = self.run_workers(&run.ctx, generation, worker, jobs).await?;

        let mut barrier = GenerationCheckpoint {
            generation,
            worker: worker.to_string(),
            slots: vec![Slot::Done { updates: Vec::new() }; size],
        };
        let pending = self.settle(run, &mut barrier, outcomes).await;
        self.join_or_suspend(run, barrier, pending).await
    }

    /// Run worker invocations concurrently, bounded by the semaphore.
    ///
    /// The first failure aborts the remaining invocations; aborted workers
    /// stop at their next await point.
    async fn run_workers(
        &self,
        ctx: &RuntimeContext,
        generation: u64,
        worker: &str,
        jobs: Vec<(usize, Value, Option<ReviewResponse>)>,
    ) -> WorkflowResult<Vec<(usize, WorkerOutcome)>> {
        let node = self
            .workers
            .get(worker)
            .ok_or_else(|| WorkflowError::NotFound(format!("Worker '{}'", worker)))?
            .clone();

        let mut join_set = JoinSet::new();
        let expected = jobs.len();

        for (index, input, resume) in jobs {
            // Each invocation exclusively owns its worker state
            let mut worker_state =
                W::from_json(input.clone()).map_err(|e| e.at_node(worker, Some(generation)))?;
            let node = node.clone();
            let sem = self.parallelism_semaphore.clone();
            let mut worker_ctx = ctx.for_worker(worker, generation, index);
            if let Some(response) = resume {
                worker_ctx = worker_ctx.with_resume(response);
            }
            let span = tracing::info_span!("workflow.worker", generation, index, worker = %worker);

            join_set.spawn(
                async move {
                    // Acquire semaphore permit to enforce max_parallelism
                    let _permit = sem.acquire_owned().await.map_err(|_| {
                        WorkflowError::execution("parallelism semaphore closed")
                    })?;
                    let command = node.call(&mut worker_state, &worker_ctx).await?;
                    Ok::<(usize, Value, Command), WorkflowError>((index, input, command))
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(expected);
        while let Some(joined) = join_set.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(WorkflowError::execution(format!("worker task failed: {}", e)))
            });

            let (index, input, command) = match result {
                Ok(done) => done,
                Err(e) => {
                    join_set.abort_all();
                    let e = e.at_node(worker, Some(generation));
                    error!(generation, worker, error = %e, "worker failed; aborting generation");
                    return Err(e);
                }
            };

            let Command {
                updates, control, ..
            } = command;
            let outcome = match control {
                ControlFlow::Interrupt(request) => {
                    if !updates.is_empty() {
                        warn!(worker, index, "discarding updates returned alongside an interrupt");
                    }
                    WorkerOutcome::Suspended { input, request }
                }
                ControlFlow::Continue | ControlFlow::Return => {
                    debug!(generation, index, worker, "worker completed");
                    self.emit(ExecutionEvent::WorkerCompleted {
                        run_id: ctx.execution_id.clone(),
                        generation,
                        index,
                    })
                    .await;
                    WorkerOutcome::Done(updates)
                }
                _ => {
                    join_set.abort_all();
                    return Err(WorkflowError::routing(
                        worker,
                        None,
                        "workers route through their outgoing edge; goto and send are not allowed",
                    )
                    .at_node(worker, Some(generation)));
                }
            };
            outcomes.push((index, outcome));
        }

        outcomes.sort_by_key(|(index, _)| *index);
        Ok(outcomes)
    }

    /// Place worker outcomes into their slots; returns new pending reviews
    async fn settle(
        &self,
        run: &Run<S>,
        barrier: &mut GenerationCheckpoint,
        outcomes: Vec<(usize, WorkerOutcome)>,
    ) -> Vec<PendingReview> {
        let mut pending = Vec::new();
        for (index, outcome) in outcomes {
            barrier.slots[index] = match outcome {
                WorkerOutcome::Done(updates) => Slot::Done { updates },
                WorkerOutcome::Suspended { input, request } => {
                    let token = ResumeToken::new();
                    info!(
                        run_id = run.id(),
                        generation = barrier.generation,
                        index,
                        worker = %barrier.worker,
                        "worker suspended for review"
                    );
                    self.emit(ExecutionEvent::Interrupted {
                        run_id: run.id().to_string(),
                        node: barrier.worker.clone(),
                        generation: Some(barrier.generation),
                        index: Some(index),
                        token: token.clone(),
                    })
                    .await;
                    pending.push(PendingReview {
                        token: token.clone(),
                        node: barrier.worker.clone(),
                        generation: Some(barrier.generation),
                        index: Some(index),
                        request,
                    });
                    Slot::Suspended { token, input }
                }
            };
        }
        pending
    }

    /// Fan-in aggregator: merge a complete generation in slot order, or
    /// checkpoint it while workers wait for review
    async fn join_or_suspend(
        &self,
        run: &mut Run<S>,
        barrier: GenerationCheckpoint,
        pending: Vec<PendingReview>,
    ) -> WorkflowResult<Flow> {
        if !barrier.is_complete() {
            return self.suspend(run, Cursor::Generation(barrier), pending).await;
        }

        for slot in &barrier.slots {
            if let Slot::Done { updates } = slot {
                run.store
                    .apply_update(updates)
                    .await
                    .map_err(|e| e.at_node(&barrier.worker, Some(barrier.generation)))?;
            }
        }

        info!(
            run_id = run.id(),
            generation = barrier.generation,
            size = barrier.slots.len(),
            "generation joined"
        );
        self.emit(ExecutionEvent::GenerationJoined {
            run_id: run.id().to_string(),
            generation: barrier.generation,
            size: barrier.slots.len(),
        })
        .await;

        match self.edges.get(&barrier.worker) {
            Some(EdgeTarget::Single(target)) => Ok(Flow::Next(target.clone())),
            _ => Err(WorkflowError::ValidationFailed(format!(
                "Worker '{}' has no fixed outgoing edge",
                barrier.worker
            ))),
        }
    }

    async fn suspend_node(
        &self,
        run: &mut Run<S>,
        node_id: &str,
        request: ReviewRequest,
    ) -> WorkflowResult<Flow> {
        let token = ResumeToken::new();
        info!(run_id = run.id(), node = node_id, "node suspended for review");
        self.emit(ExecutionEvent::Interrupted {
            run_id: run.id().to_string(),
            node: node_id.to_string(),
            generation: None,
            index: None,
            token: token.clone(),
        })
        .await;

        let pending = vec![PendingReview {
            token,
            node: node_id.to_string(),
            generation: None,
            index: None,
            request,
        }];
        let cursor = Cursor::Node {
            node: node_id.to_string(),
        };
        self.suspend(run, cursor, pending).await
    }

    /// Persist the run and hand control back to the caller
    async fn suspend(
        &self,
        run: &Run<S>,
        cursor: Cursor,
        pending: Vec<PendingReview>,
    ) -> WorkflowResult<Flow> {
        let checkpoint = Checkpoint {
            run_id: run.id().to_string(),
            graph_id: self.id.clone(),
            state: run.store.state().to_json()?,
            version: run.store.version(),
            written_once: run.store.written_once().clone(),
            generation: run.generation,
            steps_used: run.ctx.remaining_steps.used().await,
            cursor,
            pending: pending.clone(),
            created_at: Utc::now(),
        };
        self.checkpoints.save(&checkpoint).await?;

        Ok(Flow::Suspend(Suspension {
            run_id: run.id().to_string(),
            graph_id: self.id.clone(),
            pending,
        }))
    }

    /// Re-invoke the suspended node or worker, then keep walking
    async fn continue_run(
        &self,
        mut run: Run<S>,
        checkpoint: Checkpoint,
        pending: PendingReview,
        response: ReviewResponse,
    ) -> WorkflowResult<RunOutcome<S>> {
        if !pending.request.allows(response.kind()) {
            return Err(WorkflowError::interrupt_protocol(
                &pending.node,
                format!("response '{}' is not allowed for this review", response.kind()),
            )
            .at_node(&pending.node, pending.generation));
        }

        let flow = match checkpoint.cursor {
            Cursor::Node { node } => self.run_node(&mut run, &node, Some(response)).await?,
            Cursor::Generation(mut barrier) => {
                let index = barrier.slot_for(&pending.token).ok_or_else(|| {
                    WorkflowError::Checkpoint(format!(
                        "token '{}' has no suspended slot",
                        pending.token
                    ))
                })?;
                let input = match &barrier.slots[index] {
                    Slot::Suspended { input, .. } => input.clone(),
                    Slot::Done { .. } => {
                        return Err(WorkflowError::Checkpoint(format!(
                            "slot {} is already complete",
                            index
                        )));
                    }
                };

                let worker = barrier.worker.clone();
                let outcomes = self
                    .run_workers(
                        &run.ctx,
                        barrier.generation,
                        &worker,
                        vec![(index, input, Some(response))],
                    )
                    .await?;

                let mut still_pending = checkpoint.pending;
                still_pending.extend(self.settle(&run, &mut barrier, outcomes).await);
                self.join_or_suspend(&mut run, barrier, still_pending).await?
            }
        };

        self.drive(run, flow).await
    }

    /// Log the end of a drive and clean up the checkpoint of finished runs
    async fn conclude(
        &self,
        run_id: &str,
        result: WorkflowResult<RunOutcome<S>>,
    ) -> WorkflowResult<RunOutcome<S>> {
        match &result {
            Ok(RunOutcome::Suspended(suspension)) => {
                info!(
                    run_id,
                    pending = suspension.pending.len(),
                    "Graph '{}' run suspended",
                    self.id
                );
                return result;
            }
            Ok(RunOutcome::Completed { .. }) => {
                info!(run_id, "Graph '{}' execution completed", self.id);
                self.emit(ExecutionEvent::RunCompleted {
                    run_id: run_id.to_string(),
                })
                .await;
            }
            Err(e) => {
                error!(run_id, error = %e, "Graph '{}' execution failed", self.id);
                self.emit(ExecutionEvent::RunFailed {
                    run_id: run_id.to_string(),
                    error: e.to_string(),
                })
                .await;
            }
        }

        if let Err(e) = self.checkpoints.delete(run_id).await {
            warn!(run_id, error = %e, "could not delete checkpoint of finished run");
        }
        result
    }
}

#[async_trait]
impl<S: GraphState, W: GraphState> CompiledGraph<S> for CompiledGraphImpl<S, W> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(
        &self,
        input: S,
        config: Option<RuntimeContext>,
    ) -> WorkflowResult<RunOutcome<S>> {
        let ctx =
            config.unwrap_or_else(|| RuntimeContext::with_config(&self.id, self.config.clone()));
        let run_id = ctx.execution_id.clone();

        info!(
            "Starting graph execution '{}' with execution_id={}",
            self.id, run_id
        );
        self.emit(ExecutionEvent::RunStarted {
            run_id: run_id.clone(),
            graph_id: self.id.clone(),
        })
        .await;

        let run = Run {
            ctx,
            store: StateStore::new(input, self.schema.clone()),
            generation: 0,
        };
        let result = self
            .drive(run, Flow::Next(self.entry_point.clone()))
            .await;
        self.conclude(&run_id, result).await
    }

    async fn resume(
        &self,
        token: &ResumeToken,
        response: ReviewResponse,
    ) -> WorkflowResult<RunOutcome<S>> {
        let _guard = self.resume_lock.lock().await;

        let mut checkpoint = self
            .checkpoints
            .find_by_token(token)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("resume token '{}'", token)))?;
        if checkpoint.graph_id != self.id {
            return Err(WorkflowError::NotFound(format!(
                "resume token '{}' belongs to graph '{}'",
                token, checkpoint.graph_id
            )));
        }
        let pending = checkpoint
            .take_pending(token)
            .ok_or_else(|| WorkflowError::NotFound(format!("resume token '{}'", token)))?;

        let run_id = checkpoint.run_id.clone();
        info!(run_id = %run_id, node = %pending.node, response = %response.kind(), "resuming run");
        self.emit(ExecutionEvent::Resumed {
            run_id: run_id.clone(),
            node: pending.node.clone(),
            token: token.clone(),
            response: response.kind(),
        })
        .await;

        let result = match S::from_json(checkpoint.state.clone()) {
            Ok(state) => {
                let run = Run {
                    ctx: RuntimeContext::restored(
                        &self.id,
                        &run_id,
                        self.config.clone(),
                        checkpoint.steps_used,
                    ),
                    store: StateStore::restore(
                        state,
                        self.schema.clone(),
                        checkpoint.version,
                        checkpoint.written_once.clone(),
                    ),
                    generation: checkpoint.generation,
                };
                self.continue_run(run, checkpoint, pending, response).await
            }
            Err(e) => Err(WorkflowError::Checkpoint(format!(
                "checkpoint state does not fit this graph: {}",
                e
            ))),
        };
        self.conclude(&run_id, result).await
    }

    fn state_schema(&self) -> &StateSchema {
        &self.schema
    }
}
