//! Report-writing workflow
//!
//! `orchestrator` plans a list of tasks for a topic, one `llm_call` worker per
//! task writes a section, and `synthesizer` assembles the sections into a
//! Markdown report in task order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use trellis_kernel::llm::{GenerationRequest, TextGenerator};
use trellis_kernel::workflow::{
    Command, END, FanOutEdge, GraphState, NodeFunc, ReducerType, RuntimeContext, START,
    SendCommand, StateField, StateGraph, StateSchema, WorkflowError, WorkflowResult,
};

use crate::workflow::{HumanReviewNode, StateGraphImpl};

/// Id of the report-writing graph
pub const REPORT_GRAPH: &str = "report";

pub const ORCHESTRATOR: &str = "orchestrator";
pub const LLM_CALL: &str = "llm_call";
pub const SYNTHESIZER: &str = "synthesizer";

const PLAN_SYSTEM: &str = "Generate a plan for the report. Reply with JSON of the form \
{\"sections\": [{\"name\": \"...\", \"description\": \"...\"}]}.";
const SECTION_SYSTEM: &str = "Write a report section.";

/// One unit of planned work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub description: String,
}

impl Task {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Markdown anchor of the section heading
    pub fn anchor(&self) -> String {
        self.name.to_lowercase().replace(' ', "-")
    }
}

#[derive(Debug, Deserialize)]
struct Plan {
    sections: Vec<Task>,
}

/// Run state of the report and triage graphs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub topic: String,
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub completed_sections: Vec<String>,
    #[serde(default)]
    pub final_report: Option<String>,
}

impl WorkflowState {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }
}

impl GraphState for WorkflowState {
    fn schema() -> StateSchema {
        StateSchema::new("WorkflowState")
            .add_field(StateField::new("topic", ReducerType::Overwrite).write_once())
            .field("decision", ReducerType::Overwrite)
            .field("tasks", ReducerType::Overwrite)
            .add_field(
                StateField::new("completed_sections", ReducerType::Append)
                    .with_description("Section texts, one per task"),
            )
            .add_field(StateField::new("final_report", ReducerType::Overwrite).write_once())
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        match key {
            "topic" => serde_json::to_value(&self.topic).ok(),
            "decision" => serde_json::to_value(&self.decision).ok(),
            "tasks" => serde_json::to_value(&self.tasks).ok(),
            "completed_sections" => serde_json::to_value(&self.completed_sections).ok(),
            "final_report" => serde_json::to_value(&self.final_report).ok(),
            _ => None,
        }
    }

    fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()> {
        match key {
            "topic" => self.topic = serde_json::from_value(value)?,
            "decision" => self.decision = serde_json::from_value(value)?,
            "tasks" => self.tasks = serde_json::from_value(value)?,
            "completed_sections" => self.completed_sections = serde_json::from_value(value)?,
            "final_report" => self.final_report = serde_json::from_value(value)?,
            other => {
                return Err(WorkflowError::merge(
                    other,
                    "field is not declared in state schema 'WorkflowState'",
                ));
            }
        }
        Ok(())
    }

    fn to_json(&self) -> WorkflowResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_json(value: Value) -> WorkflowResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// State of one `llm_call` invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    pub task: Task,
    #[serde(default)]
    pub completed_sections: Vec<String>,
}

impl GraphState for WorkerState {
    fn schema() -> StateSchema {
        StateSchema::new("WorkerState")
            .field("task", ReducerType::Overwrite)
            .field("completed_sections", ReducerType::Append)
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        match key {
            "task" => serde_json::to_value(&self.task).ok(),
            "completed_sections" => serde_json::to_value(&self.completed_sections).ok(),
            _ => None,
        }
    }

    fn set_value(&mut self, key: &str, value: Value) -> WorkflowResult<()> {
        match key {
            "task" => self.task = serde_json::from_value(value)?,
            "completed_sections" => self.completed_sections = serde_json::from_value(value)?,
            other => {
                return Err(WorkflowError::merge(
                    other,
                    "field is not declared in state schema 'WorkerState'",
                ));
            }
        }
        Ok(())
    }

    fn to_json(&self) -> WorkflowResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_json(value: Value) -> WorkflowResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Plans the report's tasks
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NodeFunc<WorkflowState> for Orchestrator {
    async fn call(
        &self,
        state: &mut WorkflowState,
        _ctx: &RuntimeContext,
    ) -> WorkflowResult<Command> {
        let request = GenerationRequest::new(format!("Here is the report topic: {}", state.topic))
            .system(PLAN_SYSTEM)
            .json();
        let plan: Plan = self.generator.generate(request).await?.parse_json()?;

        info!(
            tasks = ?plan.sections.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "planned report"
        );
        Ok(Command::new().update("tasks", serde_json::to_value(&plan.sections)?))
    }

    fn name(&self) -> &str {
        ORCHESTRATOR
    }

    fn description(&self) -> Option<&str> {
        Some("Plans the sections of the report")
    }
}

/// Writes the section for one task
pub struct SectionWriter {
    generator: Arc<dyn TextGenerator>,
}

impl SectionWriter {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NodeFunc<WorkerState> for SectionWriter {
    async fn call(&self, state: &mut WorkerState, _ctx: &RuntimeContext) -> WorkflowResult<Command> {
        let request = GenerationRequest::new(format!(
            "Task name: {}\nDescription: {}",
            state.task.name, state.task.description
        ))
        .system(SECTION_SYSTEM);
        let section = self.generator.generate(request).await?;

        Ok(Command::new().update("completed_sections", json!([section.text])))
    }

    fn name(&self) -> &str {
        LLM_CALL
    }

    fn description(&self) -> Option<&str> {
        Some("Writes one report section")
    }
}

/// Assembles the final report
pub struct Synthesizer;

impl Synthesizer {
    /// Title, table of contents and sections, each section paired with the
    /// task at the same position
    pub fn render(topic: &str, tasks: &[Task], sections: &[String]) -> String {
        let mut toc_lines = vec!["## Table of Contents\n".to_string()];
        toc_lines.extend(
            tasks
                .iter()
                .map(|task| format!("- [{}](#{})", task.name, task.anchor())),
        );
        let toc = toc_lines.join("\n");

        let body = tasks
            .iter()
            .zip(sections)
            .map(|(task, content)| format!("## {}\n\n{}\n", task.name, content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        format!("# Report on {}\n\n{}\n\n---\n\n{}", topic, toc, body)
    }
}

#[async_trait]
impl NodeFunc<WorkflowState> for Synthesizer {
    async fn call(
        &self,
        state: &mut WorkflowState,
        _ctx: &RuntimeContext,
    ) -> WorkflowResult<Command> {
        if state.tasks.len() != state.completed_sections.len() {
            return Err(WorkflowError::execution(format!(
                "{} sections for {} tasks; refusing to assemble a partial report",
                state.completed_sections.len(),
                state.tasks.len()
            )));
        }
        let report = Self::render(&state.topic, &state.tasks, &state.completed_sections);
        Ok(Command::new().update("final_report", Value::String(report)))
    }

    fn name(&self) -> &str {
        SYNTHESIZER
    }

    fn description(&self) -> Option<&str> {
        Some("Assembles sections into the final report")
    }
}

/// One `llm_call` dispatch per planned task, in plan order
pub fn assign_workers(state: &WorkflowState) -> WorkflowResult<Vec<SendCommand>> {
    state
        .tasks
        .iter()
        .map(|task| Ok(SendCommand::new(LLM_CALL, json!({ "task": task }))))
        .collect()
}

/// Add the orchestrator, worker and synthesizer nodes and wire
/// `orchestrator -> llm_call* -> synthesizer -> END`.
///
/// With `review`, every section goes to a reviewer first; the reviewer sees
/// the task and may accept it, edit it, or answer with the section text.
pub fn add_report_flow(
    graph: &mut StateGraphImpl<WorkflowState, WorkerState>,
    generator: Arc<dyn TextGenerator>,
    review: bool,
) {
    let writer: Box<dyn NodeFunc<WorkerState>> = Box::new(SectionWriter::new(generator.clone()));
    let worker: Box<dyn NodeFunc<WorkerState>> = if review {
        Box::new(
            HumanReviewNode::new(writer, "task", "completed_sections")
                .with_description("Review the section task before it is written"),
        )
    } else {
        writer
    };

    graph
        .add_node(ORCHESTRATOR, Box::new(Orchestrator::new(generator)))
        .add_worker(LLM_CALL, worker)
        .add_node(SYNTHESIZER, Box::new(Synthesizer))
        .add_fan_out(
            ORCHESTRATOR,
            FanOutEdge::new(LLM_CALL).with_requests(assign_workers),
        )
        .add_edge(LLM_CALL, SYNTHESIZER)
        .add_edge(SYNTHESIZER, END);
}

/// Report-writing graph, ready for checkpoint and event configuration
pub fn report_graph(
    generator: Arc<dyn TextGenerator>,
    review: bool,
) -> StateGraphImpl<WorkflowState, WorkerState> {
    let mut graph = StateGraphImpl::build(REPORT_GRAPH);
    add_report_flow(&mut graph, generator, review);
    graph.add_edge(START, ORCHESTRATOR);
    graph
}

/// File name for a report on `topic`
pub fn report_slug(topic: &str) -> String {
    let slug: String = topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .take(80)
        .collect();
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug
    }
}

/// Write `report` to `<output_dir>/<slug>.md` under a recovery header
pub async fn render_markdown_file(
    output_dir: &Path,
    topic: &str,
    report: &str,
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(format!("{}.md", report_slug(topic)));
    let contents = format!("# Recovery Report\n\n## Topic: {}\n\n{}", topic, report);
    tokio::fs::write(&path, contents).await?;
    info!(path = %path.display(), "report written");
    Ok(path)
}
