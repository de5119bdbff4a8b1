//! Crate-level error types for `trellis-kernel`.
//!
//! Provides a unified [`KernelError`] that composes errors from every
//! sub-module (workflow, config, IO, serialization) together with
//! [`error_stack::Report`] for rich, context-carrying error propagation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trellis_kernel::error::{KernelError, KernelResult};
//! use error_stack::ResultExt;
//!
//! fn read_email(path: &str) -> KernelResult<String> {
//!     std::fs::read_to_string(path)
//!         .map_err(KernelError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach(format!("reading {path}"))
//! }
//! ```

use crate::workflow::WorkflowError;
use thiserror::Error;

/// Crate-level error type for `trellis-kernel`.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically. Use
/// [`error_stack::Report<KernelError>`] (via [`KernelResult`]) to attach
/// human-readable context as the error propagates up the call stack.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A workflow run or graph construction failed.
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// A configuration-related error (requires the `config` feature).
    #[cfg(feature = "config")]
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
