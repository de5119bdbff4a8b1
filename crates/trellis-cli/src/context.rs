//! CLI context providing access to the engine services

use crate::CliError;
use crate::config::{ConfigLoader, GeneratorConfig, GeneratorKind, TrellisConfig};
use error_stack::{Report, ResultExt};
use std::path::Path;
use std::sync::Arc;
use trellis_foundation::llm::{
    AnthropicConfig, AnthropicGenerator, OpenAiConfig, OpenAiGenerator, ScriptedGenerator,
    TextGenerator,
};
use trellis_foundation::workflow::{CompiledGraphImpl, FileCheckpointStore};
use trellis_foundation::workflows::{
    REPORT_GRAPH, TRIAGE_GRAPH, WorkerState, WorkflowState, report_graph, triage_graph,
};
use trellis_kernel::workflow::{StateGraph, WorkflowError};
use trellis_kernel::{KernelError, KernelResult};

/// Compiled report or triage graph
pub type Workflow = CompiledGraphImpl<WorkflowState, WorkerState>;

/// Shared context for CLI commands, holding references to engine services
pub struct CliContext {
    /// Loaded configuration
    pub config: TrellisConfig,
    /// Checkpoints of suspended runs, shared by every command
    pub store: Arc<FileCheckpointStore>,
    /// Backend for every generation call
    pub generator: Arc<dyn TextGenerator>,
}

impl CliContext {
    /// Load configuration, open the checkpoint directory and build the generator
    pub async fn new(config_path: Option<&Path>) -> KernelResult<Self> {
        let config = ConfigLoader::new()
            .load(config_path)
            .map_err(|e| Report::new(KernelError::Internal(e.to_string())))
            .attach("loading trellis configuration")?;
        Self::with_config(config).await
    }

    pub async fn with_config(config: TrellisConfig) -> KernelResult<Self> {
        let store = FileCheckpointStore::open(&config.checkpoint_dir)
            .await
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach(format!(
                "opening checkpoint directory {}",
                config.checkpoint_dir.display()
            ))?;

        let generator = build_generator(&config.generator)
            .map_err(KernelError::from)
            .map_err(Report::new)
            .attach(format!("building '{}' generator", config.generator.kind))?;

        tracing::debug!(
            generator = %config.generator.kind,
            checkpoint_dir = %config.checkpoint_dir.display(),
            "cli context ready"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            generator,
        })
    }

    /// Compile the workflow `graph_id` against the shared store and engine config
    pub fn workflow(&self, graph_id: &str, review: bool) -> Result<Workflow, CliError> {
        let mut graph = match graph_id {
            REPORT_GRAPH => report_graph(self.generator.clone(), review),
            TRIAGE_GRAPH => triage_graph(self.generator.clone(), review),
            other => return Err(CliError::UnknownWorkflow(other.to_string())),
        };
        graph
            .with_checkpoint_store(self.store.clone())
            .with_config(self.config.engine.clone());
        Ok(graph.compile()?)
    }
}

/// Build the generator selected by `config`
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn TextGenerator>, WorkflowError> {
    match config.kind {
        GeneratorKind::Scripted => Ok(Arc::new(ScriptedGenerator::new())),
        GeneratorKind::Anthropic => {
            let mut cfg = AnthropicConfig::new(api_key(config));
            if let Some(model) = &config.model {
                cfg = cfg.with_model(model);
            }
            if let Some(url) = &config.base_url {
                cfg = cfg.with_base_url(url);
            }
            if let Some(tokens) = config.max_tokens {
                cfg = cfg.with_max_tokens(tokens);
            }
            if let Some(secs) = config.timeout_secs {
                cfg = cfg.with_timeout(secs);
            }
            Ok(Arc::new(AnthropicGenerator::with_config(cfg)?))
        }
        GeneratorKind::OpenAi => {
            let key = api_key(config);
            if key.is_empty() {
                return Err(WorkflowError::Execution(format!(
                    "{} is not set",
                    config.api_key_var()
                )));
            }
            let mut cfg = OpenAiConfig::new(key);
            if let Some(model) = &config.model {
                cfg = cfg.with_model(model);
            }
            if let Some(url) = &config.base_url {
                cfg = cfg.with_base_url(url);
            }
            if let Some(tokens) = config.max_tokens {
                cfg = cfg.with_max_tokens(tokens);
            }
            Ok(Arc::new(OpenAiGenerator::with_config(cfg)))
        }
    }
}

fn api_key(config: &GeneratorConfig) -> String {
    std::env::var(config.api_key_var()).unwrap_or_default()
}
