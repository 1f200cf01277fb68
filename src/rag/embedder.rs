use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

/// Batches texts through the provider's embeddings endpoint.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn LlmProvider>,
    model: String,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// One vector per input, in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let embedded = self.provider.embed(batch, &self.model).await?;
            if embedded.len() != batch.len() {
                return Err(ApiError::upstream(format!(
                    "Embeddings returned {} vectors for {} inputs",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }

        if let Some(first) = vectors.first() {
            let dimensions = first.len();
            if dimensions == 0 {
                return Err(ApiError::upstream("Embeddings returned an empty vector"));
            }
            if vectors.iter().any(|vector| vector.len() != dimensions) {
                return Err(ApiError::upstream(
                    "Embeddings returned vectors of differing dimensionality",
                ));
            }
        }

        tracing::debug!(
            model = %self.model,
            inputs = texts.len(),
            "Embedded texts"
        );
        Ok(vectors)
    }

    pub async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<EmbeddingVector>, ApiError> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.embed(&texts).await?;
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingVector {
                chunk_id: chunk.id.clone(),
                vector,
            })
            .collect())
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::upstream("Embeddings returned no vector for the query"))
    }
}
