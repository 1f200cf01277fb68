use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::embedder::EmbeddingClient;
use super::store::{RetrievalHit, VectorStore};
use crate::core::errors::ApiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    pub namespace: Option<String>,
}

/// Embeds the query text and asks the store for its nearest chunks.
#[derive(Clone)]
pub struct Retriever {
    embedder: EmbeddingClient,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: EmbeddingClient, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RetrievalHit>, ApiError> {
        let vector = self.embedder.embed_query(&query.text).await?;
        let hits = self
            .store
            .query(&vector, query.top_k, query.namespace.as_deref())
            .await?;

        tracing::debug!(
            top_k = query.top_k,
            namespace = query.namespace.as_deref().unwrap_or("*"),
            hits = hits.len(),
            "Retrieved context"
        );
        Ok(hits)
    }
}
