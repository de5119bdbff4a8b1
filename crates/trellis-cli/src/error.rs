#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Review error: {0}")]
    Review(String),

    #[error("Unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("Workflow error: {0}")]
    Workflow(#[from] trellis_kernel::workflow::WorkflowError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dialoguer error: {0}")]
    DialoguerError(#[from] dialoguer::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError::Other(s.to_string())
    }
}

impl From<String> for CliError {
    fn from(s: String) -> Self {
        CliError::Other(s)
    }
}
