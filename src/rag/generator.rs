//! Prompt assembly and the completion call.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::store::RetrievalHit;
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};

pub const NO_ANSWER: &str = "I don't know based on provided documents.";

const SYSTEM_PROMPT: &str = "You are an assistant that answers using only the provided context. \
If the answer can't be found, say 'I don't know based on provided documents'.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub used_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone)]
pub struct AnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    config: GeneratorConfig,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self { provider, config }
    }

    pub fn build_request(&self, query: &str, hits: &[RetrievalHit]) -> ChatRequest {
        let context = hits
            .iter()
            .map(|hit| hit.metadata.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        let user_prompt = format!("Question: {}\n\nContext:\n{}\n\nAnswer:", query, context);

        ChatRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
    }

    /// Answers from the given chunks. With no chunks there is nothing to ground
    /// an answer in, so the provider is not called.
    pub async fn generate(&self, query: &str, hits: &[RetrievalHit]) -> Result<Answer, ApiError> {
        if hits.is_empty() {
            return Ok(Answer {
                text: NO_ANSWER.to_string(),
                used_chunk_ids: Vec::new(),
            });
        }

        let request = self.build_request(query, hits);
        let text = self.provider.chat(request, &self.config.model).await?;

        tracing::debug!(
            provider = self.provider.name(),
            model = %self.config.model,
            chunks = hits.len(),
            "Generated answer"
        );
        Ok(Answer {
            text: text.trim().to_string(),
            used_chunk_ids: hits.iter().map(|hit| hit.id.clone()).collect(),
        })
    }
}
