//! Text-generation clients
//!
//! Implementations of [`trellis_kernel::llm::TextGenerator`]:
//! - [`AnthropicGenerator`]: Anthropic Messages API over `reqwest`
//! - [`OpenAiGenerator`]: OpenAI-compatible chat completions via `async-openai`
//! - [`ScriptedGenerator`]: deterministic offline replies

pub mod anthropic;
pub mod openai;
pub mod scripted;

pub use anthropic::{AnthropicConfig, AnthropicGenerator};
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use scripted::ScriptedGenerator;

pub use trellis_kernel::llm::{
    GenerationError, GenerationRequest, GenerationResponse, OutputFormat, TextGenerator, Usage,
};
