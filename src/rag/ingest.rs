use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::chunker::Chunker;
use super::document::Document;
use super::embedder::EmbeddingClient;
use super::store::{RecordMetadata, VectorRecord, VectorStore};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub namespace: String,
    pub source: String,
    pub chunks: usize,
}

/// Chunk, embed and store one document.
///
/// Every chunk is embedded before anything is written, and the write replaces
/// the document's previous chunks in a single store call. A failed embedding
/// leaves the store untouched.
#[derive(Clone)]
pub struct Ingestor {
    chunker: Chunker,
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
}

impl Ingestor {
    pub fn new(chunker: Chunker, embedder: EmbeddingClient, store: Arc<dyn VectorStore>) -> Self {
        Self {
            chunker,
            embedder,
            store,
        }
    }

    pub async fn ingest(&self, document: &Document) -> Result<IngestReport, ApiError> {
        let chunks = self.chunker.split(&document.id, &document.text);
        if chunks.is_empty() || chunks.iter().all(|chunk| chunk.text.trim().is_empty()) {
            return Err(ApiError::BadRequest(
                "Document contains no text to index.".to_string(),
            ));
        }

        let embeddings = self.embedder.embed_chunks(&chunks).await?;
        let ingested_at = Utc::now();

        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                id: chunk.id,
                vector: embedding.vector,
                metadata: RecordMetadata {
                    document_id: document.id.clone(),
                    namespace: document.namespace.clone(),
                    source: document.source.clone(),
                    chunk_index: chunk.index,
                    start_offset: chunk.start_offset,
                    end_offset: chunk.end_offset,
                    text: chunk.text,
                    ingested_at,
                },
            })
            .collect();
        let count = records.len();

        self.store.replace_document(&document.id, records).await?;

        tracing::info!(
            document_id = %document.id,
            namespace = %document.namespace,
            chunks = count,
            "Ingested document"
        );
        Ok(IngestReport {
            document_id: document.id.clone(),
            namespace: document.namespace.clone(),
            source: document.source.clone(),
            chunks: count,
        })
    }
}
