//! Anthropic Claude generator
//!
//! Lightweight implementation of Anthropic's Messages API, text only.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use trellis_kernel::llm::{
    GenerationError, GenerationRequest, GenerationResponse, OutputFormat, TextGenerator, Usage,
};
use trellis_kernel::workflow::WorkflowResult;

/// Anthropic generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: String,
    /// Base URL, e.g. https://api.anthropic.com
    pub base_url: String,
    /// API version header value
    pub version: String,
    /// Default model
    pub default_model: String,
    /// Default max output tokens (required by Anthropic)
    pub default_max_tokens: u32,
    /// Request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            version: "2023-06-01".to_string(),
            default_model: "claude-3-5-sonnet-latest".to_string(),
            default_max_tokens: 4096,
            timeout_secs: 60,
        }
    }
}

impl AnthropicConfig {
    /// Create config from API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Build from environment variables
    pub fn from_env() -> Self {
        let mut cfg = Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            ..Default::default()
        };

        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            cfg.default_model = model;
        }
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            cfg.base_url = base_url;
        }

        cfg
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.default_max_tokens = tokens;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Text generator backed by the Anthropic Messages API
pub struct AnthropicGenerator {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicGenerator {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GenerationError> {
        Self::with_config(AnthropicConfig::new(api_key))
    }

    pub fn from_env() -> Result<Self, GenerationError> {
        Self::with_config(AnthropicConfig::from_env())
    }

    pub fn with_config(config: AnthropicConfig) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::Config(
                "Anthropic API key is empty (set ANTHROPIC_API_KEY)".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let max_tokens = request.max_tokens.unwrap_or(self.config.default_max_tokens);

        let mut system = request.system.clone().unwrap_or_default();
        if request.format == OutputFormat::Json {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str("Respond with a single JSON document and nothing else.");
        }

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [{
                "role": "user",
                "content": [{"type": "text", "text": request.prompt}],
            }],
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }
        body
    }

    fn map_error(err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(err.to_string())
        } else {
            GenerationError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessageResponse {
    model: String,
    content: Vec<AnthropicContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn generate(&self, request: GenerationRequest) -> WorkflowResult<GenerationResponse> {
        let body = self.request_body(&request);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        debug!(model = %body["model"], "anthropic request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.version)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(Self::map_error)?;

        if !status.is_success() {
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: text,
            }
            .into());
        }

        let parsed: AnthropicMessageResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let content_text = parsed
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.clone())
            .collect::<Vec<_>>()
            .join("");

        Ok(GenerationResponse {
            text: content_text,
            model: parsed.model,
            usage: parsed.usage.map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
        })
    }
}
