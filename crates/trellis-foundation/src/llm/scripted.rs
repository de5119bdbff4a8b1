//! Scripted generator
//!
//! Deterministic, rule-based replies for offline runs and tests. JSON requests
//! whose system prompt mentions spam are answered with a classification,
//! other JSON requests with a report plan, and text requests with a section
//! written from the prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use trellis_kernel::llm::{
    GenerationError, GenerationRequest, GenerationResponse, OutputFormat, TextGenerator,
};
use trellis_kernel::workflow::WorkflowResult;

const DEFAULT_SPAM_MARKERS: &[&str] = &[
    "unsubscribe",
    "winner",
    "lottery",
    "click here",
    "limited time offer",
    "claim your prize",
];

/// Offline generator with call counters
pub struct ScriptedGenerator {
    plan_sections: Vec<String>,
    spam_markers: Vec<String>,
    latency: Duration,
    fail_on: Option<String>,
    plans: AtomicUsize,
    classifications: AtomicUsize,
    sections: AtomicUsize,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            plan_sections: vec![
                "Introduction".to_string(),
                "Key Findings".to_string(),
                "Conclusion".to_string(),
            ],
            spam_markers: DEFAULT_SPAM_MARKERS.iter().map(|s| s.to_string()).collect(),
            latency: Duration::ZERO,
            fail_on: None,
            plans: AtomicUsize::new(0),
            classifications: AtomicUsize::new(0),
            sections: AtomicUsize::new(0),
        }
    }

    /// Section names returned by every plan
    pub fn with_plan(mut self, sections: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.plan_sections = sections.into_iter().map(Into::into).collect();
        self
    }

    /// Phrases that make an email spam (matched case-insensitively)
    pub fn with_spam_markers(
        mut self,
        markers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.spam_markers = markers
            .into_iter()
            .map(|m| m.into().to_lowercase())
            .collect();
        self
    }

    /// Delay every reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail any request whose prompt contains `needle`
    pub fn failing_on(mut self, needle: impl Into<String>) -> Self {
        self.fail_on = Some(needle.into());
        self
    }

    /// Number of plans produced
    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    /// Number of classifications produced
    pub fn classifications(&self) -> usize {
        self.classifications.load(Ordering::SeqCst)
    }

    /// Number of sections written
    pub fn sections(&self) -> usize {
        self.sections.load(Ordering::SeqCst)
    }

    /// Total calls
    pub fn calls(&self) -> usize {
        self.plans() + self.classifications() + self.sections()
    }

    fn is_classification(request: &GenerationRequest) -> bool {
        request
            .system
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains("spam"))
    }

    fn plan(&self, request: &GenerationRequest) -> String {
        self.plans.fetch_add(1, Ordering::SeqCst);
        let topic = request
            .prompt
            .rsplit(": ")
            .next()
            .unwrap_or(&request.prompt)
            .trim();
        let sections: Vec<_> = self
            .plan_sections
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "description": format!("{} of the report on {}", name, topic),
                })
            })
            .collect();
        json!({ "sections": sections }).to_string()
    }

    fn classify(&self, request: &GenerationRequest) -> String {
        self.classifications.fetch_add(1, Ordering::SeqCst);
        let body = request.prompt.to_lowercase();
        let spam = self.spam_markers.iter().any(|m| body.contains(m.as_str()));
        let decision = if spam { "False" } else { "True" };
        json!({ "decision": decision }).to_string()
    }

    fn section(&self, request: &GenerationRequest) -> String {
        self.sections.fetch_add(1, Ordering::SeqCst);
        let mut name = None;
        let mut description = None;
        for line in request.prompt.lines() {
            if let Some(rest) = line.strip_prefix("Task name: ") {
                name = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("Description: ") {
                description = Some(rest.trim());
            }
        }
        match (name, description) {
            (Some(name), Some(description)) => {
                format!("{} covers the following: {}.", name, description)
            }
            _ => format!("Notes on: {}", request.prompt.trim()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> WorkflowResult<GenerationResponse> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(needle) = &self.fail_on {
            if request.prompt.contains(needle.as_str()) {
                return Err(GenerationError::Api {
                    status: 503,
                    message: format!("scripted failure on '{}'", needle),
                }
                .into());
            }
        }

        let text = match request.format {
            OutputFormat::Json if Self::is_classification(&request) => self.classify(&request),
            OutputFormat::Json => self.plan(&request),
            OutputFormat::Text => self.section(&request),
        };
        debug!(chars = text.len(), "scripted reply");

        Ok(GenerationResponse::new(text, "scripted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_plan_uses_topic() {
        let generator = ScriptedGenerator::new().with_plan(["Tides", "Moons"]);
        let reply = generator
            .generate(
                GenerationRequest::new("Here is the report topic: ocean tides")
                    .system("Generate a plan for the report.")
                    .json(),
            )
            .await
            .unwrap();

        let plan: Value = reply.parse_json().unwrap();
        assert_eq!(plan["sections"][1]["name"], "Moons");
        assert_eq!(
            plan["sections"][0]["description"],
            "Tides of the report on ocean tides"
        );
        assert_eq!(generator.plans(), 1);
    }

    #[tokio::test]
    async fn test_classification_by_marker() {
        let generator = ScriptedGenerator::new();
        let classify = |body: &str| {
            GenerationRequest::new(format!("Here is the Mail in question: {}", body))
                .system("Decide whether the provided email is classified as Spam or not")
                .json()
        };

        let spam = generator
            .generate(classify("You are a WINNER! Click here"))
            .await
            .unwrap();
        let ham = generator
            .generate(classify("Can we move our meeting to Friday?"))
            .await
            .unwrap();

        assert_eq!(spam.parse_json::<Value>().unwrap()["decision"], "False");
        assert_eq!(ham.parse_json::<Value>().unwrap()["decision"], "True");
        assert_eq!(generator.classifications(), 2);
    }

    #[tokio::test]
    async fn test_section_from_task_prompt() {
        let generator = ScriptedGenerator::new();
        let reply = generator
            .generate(GenerationRequest::new(
                "Task name: Intro\nDescription: why tides happen",
            ))
            .await
            .unwrap();
        assert_eq!(reply.text, "Intro covers the following: why tides happen.");
        assert_eq!(generator.sections(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let generator = ScriptedGenerator::new().failing_on("Broken");
        let result = generator
            .generate(GenerationRequest::new("Task name: Broken\nDescription: x"))
            .await;
        assert!(result.is_err());
        assert_eq!(generator.calls(), 0);
    }
}
