//! Mail triage workflow
//!
//! `spam_protection` classifies an email and records the label in
//! `decision`. The router alone interprets that label: mail that concerns the
//! reader is turned into an action report by the report flow, spam goes to
//! `spam_report`, which writes a short preset report.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use trellis_kernel::llm::{GenerationRequest, TextGenerator};
use trellis_kernel::workflow::{
    Command, ConditionalEdge, END, GraphState, LabelNormalizer, NodeFunc, RuntimeContext, START,
    StateGraph, WorkflowResult,
};

use super::report::{ORCHESTRATOR, WorkerState, WorkflowState, add_report_flow};
use crate::workflow::{FnNode, StateGraphImpl};

/// Id of the triage graph
pub const TRIAGE_GRAPH: &str = "triage";

pub const SPAM_PROTECTION: &str = "spam_protection";

pub const SPAM_REPORT_NODE: &str = "spam_report";

/// Final report of a run that stopped at the classifier
pub const SPAM_REPORT: &str = "This email was classified as spam.";

const CLASSIFY_SYSTEM: &str = "Decide whether the provided email is classified as Spam or not. \
Reply with JSON {\"decision\": \"True\"} for mails that concern me and require action on my \
part, {\"decision\": \"False\"} otherwise.";

#[derive(Debug, Deserialize)]
struct Classification {
    decision: String,
}

/// Classifies the email in `topic`
pub struct SpamProtection {
    generator: Arc<dyn TextGenerator>,
}

impl SpamProtection {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl NodeFunc<WorkflowState> for SpamProtection {
    async fn call(
        &self,
        state: &mut WorkflowState,
        _ctx: &RuntimeContext,
    ) -> WorkflowResult<Command> {
        let request =
            GenerationRequest::new(format!("Here is the Mail in question: {}", state.topic))
                .system(CLASSIFY_SYSTEM)
                .json();
        let classification: Classification =
            self.generator.generate(request).await?.parse_json()?;
        info!(decision = %classification.decision, "spam decision");

        Ok(Command::new().update("decision", Value::String(classification.decision)))
    }

    fn name(&self) -> &str {
        SPAM_PROTECTION
    }

    fn description(&self) -> Option<&str> {
        Some("Classifies the email as actionable or spam")
    }
}

/// Writes the preset report of a spam mail
fn spam_report_node() -> Box<dyn NodeFunc<WorkflowState>> {
    FnNode::new(SPAM_REPORT_NODE, |_state: WorkflowState, _ctx| async move {
        Ok(Command::new().update("final_report", Value::String(SPAM_REPORT.to_string())))
    })
    .with_description("Ends a spam run with the preset report")
    .boxed()
}

/// `true` continues into the report flow, `false` goes to the spam report;
/// any other label is a routing error
pub fn spam_router() -> ConditionalEdge<WorkflowState> {
    ConditionalEdge::new([("true", ORCHESTRATOR), ("false", SPAM_REPORT_NODE)])
        .with_normalizer(LabelNormalizer::TrimmedCaseInsensitive)
        .with_label_fn(|state: &WorkflowState| state.decision.clone())
}

/// Triage graph: `spam_protection` in front of the report flow
pub fn triage_graph(
    generator: Arc<dyn TextGenerator>,
    review: bool,
) -> StateGraphImpl<WorkflowState, WorkerState> {
    let mut graph = StateGraphImpl::build(TRIAGE_GRAPH);
    add_report_flow(&mut graph, generator.clone(), review);
    graph
        .add_node(SPAM_PROTECTION, Box::new(SpamProtection::new(generator)))
        .add_node(SPAM_REPORT_NODE, spam_report_node())
        .add_edge(START, SPAM_PROTECTION)
        .add_conditional_edges(SPAM_PROTECTION, spam_router())
        .add_edge(SPAM_REPORT_NODE, END);
    graph
}
