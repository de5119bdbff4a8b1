//! OpenAI generator
//!
//! Chat completions through `async-openai`. Works with any OpenAI-compatible
//! endpoint (vLLM, Ollama, LocalAI) by setting `base_url`.

use async_openai::{
    Client,
    config::OpenAIConfig as AsyncOpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use tracing::debug;
use trellis_kernel::llm::{
    GenerationError, GenerationRequest, GenerationResponse, OutputFormat, TextGenerator, Usage,
};
use trellis_kernel::workflow::WorkflowResult;

/// OpenAI generator configuration
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API Key
    pub api_key: String,
    /// Base URL; the official endpoint when None
    pub base_url: Option<String>,
    /// Default model
    pub default_model: String,
    /// Default max output tokens
    pub default_max_tokens: Option<u32>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            default_model: "gpt-4o-mini".to_string(),
            default_max_tokens: None,
        }
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Build from `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_BASE_URL").ok(),
            default_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            default_max_tokens: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.default_max_tokens = Some(tokens);
        self
    }
}

/// Text generator backed by OpenAI chat completions
pub struct OpenAiGenerator {
    client: Client<AsyncOpenAIConfig>,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_config(OpenAiConfig::new(api_key))
    }

    pub fn from_env() -> Self {
        Self::with_config(OpenAiConfig::from_env())
    }

    pub fn with_config(config: OpenAiConfig) -> Self {
        let mut openai_config = AsyncOpenAIConfig::new().with_api_key(&config.api_key);

        if let Some(ref base_url) = config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        let client = Client::with_config(openai_config);

        Self { client, config }
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<CreateChatCompletionRequest, GenerationError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);

        if let Some(ref system) = request.system {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.as_str())
                    .build()
                    .map_err(|e| GenerationError::Config(e.to_string()))?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.as_str())
                .build()
                .map_err(|e| GenerationError::Config(e.to_string()))?
                .into(),
        );

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&model).messages(messages);

        if let Some(max_tokens) = request.max_tokens.or(self.config.default_max_tokens) {
            builder.max_tokens(max_tokens);
        }

        if request.format == OutputFormat::Json {
            builder.response_format(ResponseFormat::JsonObject);
        }

        builder
            .build()
            .map_err(|e| GenerationError::Config(e.to_string()))
    }

    fn convert_error(err: OpenAIError) -> GenerationError {
        match err {
            // async-openai does not expose the HTTP status of API errors
            OpenAIError::ApiError(api_err) => GenerationError::Api {
                status: 0,
                message: api_err.message,
            },
            OpenAIError::Reqwest(e) => {
                if e.is_timeout() {
                    GenerationError::Timeout(e.to_string())
                } else {
                    GenerationError::Network(e.to_string())
                }
            }
            OpenAIError::JSONDeserialize(e) => GenerationError::Decode(e.to_string()),
            OpenAIError::InvalidArgument(msg) => GenerationError::Config(msg),
            other => GenerationError::Network(other.to_string()),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    async fn generate(&self, request: GenerationRequest) -> WorkflowResult<GenerationResponse> {
        let openai_request = self.build_request(&request)?;
        debug!(model = %openai_request.model, "openai request");

        let response = self
            .client
            .chat()
            .create(openai_request)
            .await
            .map_err(Self::convert_error)?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GenerationError::Decode("response has no content".to_string()))?;

        Ok(GenerationResponse {
            text,
            model: response.model,
            usage: response.usage.map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request() {
        let generator = OpenAiGenerator::with_config(
            OpenAiConfig::new("sk-test")
                .with_base_url("http://localhost:11434/v1")
                .with_model("llama3"),
        );
        let request = generator
            .build_request(
                &GenerationRequest::new("Here is the report topic: tides")
                    .system("Generate a plan for the report.")
                    .json()
                    .max_tokens(512),
            )
            .unwrap();

        assert_eq!(request.model, "llama3");
        assert_eq!(request.messages.len(), 2);
        assert!(matches!(
            request.response_format,
            Some(ResponseFormat::JsonObject)
        ));
    }

    #[test]
    fn test_text_request_has_no_response_format() {
        let generator = OpenAiGenerator::new("sk-test");
        let request = generator
            .build_request(&GenerationRequest::new("hello"))
            .unwrap();
        assert_eq!(request.messages.len(), 1);
        assert!(request.response_format.is_none());
        assert_eq!(request.model, "gpt-4o-mini");
    }
}
