use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowError;

/// Expected shape of the generated text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Free text
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// Structured generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System instruction
    pub system: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Expected output shape
    #[serde(default)]
    pub format: OutputFormat,
    /// Output token cap; the generator's default applies when None
    pub max_tokens: Option<u32>,
    /// Model override
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            format: OutputFormat::Text,
            max_tokens: None,
            model: None,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Ask for a JSON document
    pub fn json(mut self) -> Self {
        self.format = OutputFormat::Json;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Token usage reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Structured generation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub usage: Option<Usage>,
}

impl GenerationResponse {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            usage: None,
        }
    }

    /// Parse the text as JSON.
    ///
    /// Models often wrap JSON in a Markdown code fence; the fence is stripped.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, GenerationError> {
        let trimmed = self.text.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|rest| rest.strip_suffix("```"))
            .unwrap_or(trimmed);
        serde_json::from_str(body.trim()).map_err(|e| GenerationError::Decode(e.to_string()))
    }
}

/// Failure of a text-generation call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("generation request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("generation service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode generation output: {0}")]
    Decode(String),

    #[error("generator misconfigured: {0}")]
    Config(String),
}

impl From<GenerationError> for WorkflowError {
    fn from(err: GenerationError) -> Self {
        WorkflowError::Execution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("Plan a report")
            .system("You are a planner")
            .json()
            .max_tokens(256);
        assert_eq!(request.format, OutputFormat::Json);
        assert_eq!(request.max_tokens, Some(256));
        assert_eq!(request.system.as_deref(), Some("You are a planner"));
    }

    #[test]
    fn test_parse_fenced_json() {
        let response = GenerationResponse::new("```json\n{\"sections\": []}\n```", "m");
        let value: Value = response.parse_json().unwrap();
        assert_eq!(value["sections"], Value::Array(vec![]));

        let bare = GenerationResponse::new("{\"a\": 1}", "m");
        let value: Value = bare.parse_json().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_parse_garbage_is_decode_error() {
        let response = GenerationResponse::new("not json", "m");
        let result: Result<Value, _> = response.parse_json();
        assert!(matches!(result, Err(GenerationError::Decode(_))));
    }

    #[test]
    fn test_generation_error_becomes_execution_error() {
        let err: WorkflowError = GenerationError::Api {
            status: 429,
            message: "rate limited".to_string(),
        }
        .into();
        assert!(matches!(err, WorkflowError::Execution(ref m) if m.contains("429")));
    }
}
