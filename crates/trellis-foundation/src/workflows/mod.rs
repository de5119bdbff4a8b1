//! Reference workflows
//!
//! - [`report`]: plan a topic into tasks, write one section per task
//!   concurrently, synthesize a Markdown report
//! - [`triage`]: classify an email and turn actionable mail into a report

pub mod report;
pub mod triage;

pub use report::{
    LLM_CALL, ORCHESTRATOR, Orchestrator, REPORT_GRAPH, SYNTHESIZER, SectionWriter, Synthesizer, Task,
    WorkerState, WorkflowState, add_report_flow, assign_workers, render_markdown_file,
    report_graph, report_slug,
};
pub use triage::{
    SPAM_PROTECTION, SPAM_REPORT, SPAM_REPORT_NODE, SpamProtection, TRIAGE_GRAPH, spam_router,
    triage_graph,
};
