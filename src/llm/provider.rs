use async_trait::async_trait;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

/// An external service that produces completions and embeddings.
///
/// Implementations report transport and API failures as
/// [`ApiError::UpstreamUnavailable`]; callers decide whether to retry.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// chat completion (non-streaming)
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError>;

    /// generate embeddings, one vector per input in input order
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
