use async_trait::async_trait;

use super::types::{GenerationRequest, GenerationResponse};
use crate::workflow::WorkflowResult;

/// Canonical text-generation trait (Kernel-owned)
///
/// Implementations may be slow and may fail; callers treat a failure as a
/// node-body error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generator name, used in logs
    fn name(&self) -> &str;

    /// Model used when the request names none
    fn default_model(&self) -> &str {
        ""
    }

    /// Produce text for one request
    async fn generate(&self, request: GenerationRequest) -> WorkflowResult<GenerationResponse>;
}
