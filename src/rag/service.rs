use std::sync::Arc;

use super::chunker::{Chunker, ChunkerConfig};
use super::document::Document;
use super::embedder::EmbeddingClient;
use super::generator::{Answer, AnswerGenerator, GeneratorConfig};
use super::ingest::{IngestReport, Ingestor};
use super::retriever::{Query, Retriever};
use super::store::{RetrievalHit, VectorStore};
use crate::core::config::Settings;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

/// Both pipelines over one provider and one store.
#[derive(Clone)]
pub struct RagService {
    ingestor: Ingestor,
    retriever: Retriever,
    generator: AnswerGenerator,
    store: Arc<dyn VectorStore>,
}

impl RagService {
    pub fn new(
        settings: &Settings,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, ApiError> {
        let chunker = Chunker::new(ChunkerConfig {
            chunk_size: settings.rag.chunk_size,
            chunk_overlap: settings.rag.chunk_overlap,
        })?;
        let embedder = EmbeddingClient::new(
            provider.clone(),
            settings.openai.embedding_model.clone(),
            settings.openai.embedding_batch_size,
        );
        let generator = AnswerGenerator::new(
            provider,
            GeneratorConfig {
                model: settings.openai.chat_model.clone(),
                temperature: settings.rag.temperature,
                max_tokens: settings.rag.max_tokens,
            },
        );

        Ok(Self {
            ingestor: Ingestor::new(chunker, embedder.clone(), store.clone()),
            retriever: Retriever::new(embedder, store.clone()),
            generator,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub async fn ingest(&self, document: &Document) -> Result<IngestReport, ApiError> {
        self.ingestor.ingest(document).await
    }

    pub async fn ask(&self, query: &Query) -> Result<(Answer, Vec<RetrievalHit>), ApiError> {
        let hits = self.retriever.retrieve(query).await?;
        let answer = self.generator.generate(&query.text, &hits).await?;
        Ok((answer, hits))
    }
}
