//! Configuration handling module
//!
//! Provides configuration file discovery and loading with `TRELLIS_*`
//! environment overrides.

pub mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use trellis_kernel::workflow::GraphConfig;

/// Main configuration structure for the `trellis` binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TrellisConfig {
    /// Text generation backend
    pub generator: GeneratorConfig,
    /// Engine knobs passed to every compiled graph
    pub engine: GraphConfig,
    /// Where suspended runs are checkpointed
    pub checkpoint_dir: PathBuf,
    /// Where finished reports are written
    pub output_dir: PathBuf,
}

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            engine: GraphConfig::default(),
            checkpoint_dir: PathBuf::from(".trellis/checkpoints"),
            output_dir: PathBuf::from("reports"),
        }
    }
}

/// Text generation backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorKind {
    /// Offline rule-based replies
    #[default]
    #[serde(rename = "scripted")]
    Scripted,
    /// Anthropic Messages API
    #[serde(rename = "anthropic")]
    Anthropic,
    /// OpenAI-compatible chat completions
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scripted => write!(f, "scripted"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Generator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Backend to use
    pub kind: GeneratorKind,
    /// Model name; the backend default when unset
    pub model: Option<String>,
    /// Custom base URL
    pub base_url: Option<String>,
    /// Environment variable holding the API key
    /// (`ANTHROPIC_API_KEY` / `OPENAI_API_KEY` when unset)
    pub api_key_env: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Maximum output tokens
    pub max_tokens: Option<u32>,
}

impl GeneratorConfig {
    /// Name of the environment variable holding the API key
    pub fn api_key_var(&self) -> &str {
        match (&self.api_key_env, self.kind) {
            (Some(var), _) => var,
            (None, GeneratorKind::OpenAi) => "OPENAI_API_KEY",
            (None, _) => "ANTHROPIC_API_KEY",
        }
    }
}
