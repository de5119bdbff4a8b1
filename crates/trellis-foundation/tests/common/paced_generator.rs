//! Generator whose section replies finish after a per-task delay.
//!
//! [`PacedGenerator`] answers plan requests with a fixed task list,
//! classification requests with a fixed decision, and section requests with
//! `Section about <task>` after the delay configured for that task. It counts
//! calls of each kind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use trellis_foundation::workflows::Task;
use trellis_kernel::llm::{GenerationRequest, GenerationResponse, OutputFormat, TextGenerator};
use trellis_kernel::workflow::{WorkflowError, WorkflowResult};

pub struct PacedGenerator {
    plan: Vec<Task>,
    delays: HashMap<String, Duration>,
    decision: String,
    failing_task: Option<String>,
    plans: AtomicUsize,
    sections: AtomicUsize,
}

impl PacedGenerator {
    pub fn new(plan: Vec<Task>) -> Self {
        Self {
            plan,
            delays: HashMap::new(),
            decision: "True".to_string(),
            failing_task: None,
            plans: AtomicUsize::new(0),
            sections: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, task: &str, delay: Duration) -> Self {
        self.delays.insert(task.to_string(), delay);
        self
    }

    pub fn with_decision(mut self, decision: &str) -> Self {
        self.decision = decision.to_string();
        self
    }

    pub fn failing_on(mut self, task: &str) -> Self {
        self.failing_task = Some(task.to_string());
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    pub fn section_calls(&self) -> usize {
        self.sections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for PacedGenerator {
    fn name(&self) -> &str {
        "paced"
    }

    async fn generate(&self, request: GenerationRequest) -> WorkflowResult<GenerationResponse> {
        let text = match request.format {
            OutputFormat::Json
                if request
                    .system
                    .as_deref()
                    .is_some_and(|s| s.contains("Spam")) =>
            {
                json!({ "decision": self.decision }).to_string()
            }
            OutputFormat::Json => {
                self.plans.fetch_add(1, Ordering::SeqCst);
                json!({ "sections": self.plan }).to_string()
            }
            _ => {
                let name = request
                    .prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("Task name: "))
                    .unwrap_or_default()
                    .to_string();
                if let Some(delay) = self.delays.get(&name) {
                    tokio::time::sleep(*delay).await;
                }
                if self.failing_task.as_deref() == Some(name.as_str()) {
                    return Err(WorkflowError::execution(format!(
                        "generation service unavailable for '{}'",
                        name
                    )));
                }
                self.sections.fetch_add(1, Ordering::SeqCst);
                format!("Section about {}", name)
            }
        };
        Ok(GenerationResponse::new(text, "paced"))
    }
}
