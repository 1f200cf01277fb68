//! Retrieval-augmented generation.
//!
//! Write path: [`Document`] → [`Chunker`] → [`EmbeddingClient`] → [`VectorStore`].
//! Read path: [`Query`] → [`Retriever`] → [`AnswerGenerator`].

pub mod chunker;
pub mod document;
pub mod embedder;
pub mod generator;
pub mod ingest;
pub mod retriever;
pub mod service;
pub mod sqlite;
pub mod store;

pub use chunker::{Chunk, Chunker, ChunkerConfig};
pub use document::{Document, UploadedDocument, DEFAULT_NAMESPACE};
pub use embedder::{EmbeddingClient, EmbeddingVector};
pub use generator::{Answer, AnswerGenerator, GeneratorConfig};
pub use ingest::{IngestReport, Ingestor};
pub use retriever::{Query, Retriever};
pub use service::RagService;
pub use sqlite::SqliteVectorStore;
pub use store::{RecordMetadata, RetrievalHit, VectorRecord, VectorStore};
