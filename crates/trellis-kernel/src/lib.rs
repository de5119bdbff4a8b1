// workflow module
pub mod workflow;

// text generation module
pub mod llm;

// error module
pub mod error;

// config module
#[cfg(feature = "config")]
pub mod config;

pub use error::{KernelError, KernelResult};
