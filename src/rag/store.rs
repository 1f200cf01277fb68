//! VectorStore trait — abstract interface over the vector database.
//!
//! The pipeline only talks to this trait; `SqliteVectorStore` in the
//! `sqlite` module is the bundled implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// Metadata persisted next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub document_id: String,
    pub namespace: String,
    /// Source file name, or `"text"` for inline texts.
    pub source: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    /// Full chunk text.
    pub text: String,
    pub ingested_at: DateTime<Utc>,
}

impl RecordMetadata {
    /// The first `max_chars` characters of the chunk text.
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.text.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id.
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub id: String,
    /// Cosine similarity (higher = better).
    pub score: f32,
    pub metadata: RecordMetadata,
}

/// Abstract trait for vector storage backends.
///
/// Implementations must be safe for concurrent use and report backend
/// failures as [`ApiError::StoreUnavailable`].
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert records, overwriting any record with the same id.
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), ApiError>;

    /// Remove every record of `document_id`, then insert `records`.
    async fn replace_document(
        &self,
        document_id: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), ApiError>;

    /// Nearest records first, at most `top_k` of them.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, ApiError>;

    /// Delete all records of a document. Returns the number removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize, ApiError>;

    /// Record count, optionally within one namespace.
    async fn count(&self, namespace: Option<&str>) -> Result<usize, ApiError>;

    /// Delete all records, or those of one namespace. Returns the number removed.
    async fn clear(&self, namespace: Option<&str>) -> Result<usize, ApiError>;
}
