//! Fixed-size, overlapping character windows.
//!
//! Windows advance by `chunk_size - chunk_overlap` characters and the last
//! window always ends at the end of the input, so the chunks cover the whole
//! document with no gaps. Offsets are in characters, not bytes.

use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Window length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive windows
    pub chunk_overlap: usize,
}

/// A span of a source document, embedded and stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_document_id: String,
    pub index: usize,
    pub text: String,
    pub start_offset: usize,
    /// Exclusive.
    pub end_offset: usize,
}

pub fn chunk_id(document_id: &str, start_offset: usize) -> String {
    format!("{}#{}", document_id, start_offset)
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ApiError> {
        if config.chunk_size == 0 {
            return Err(ApiError::BadRequest(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ApiError::BadRequest(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        Ok(Self { config })
    }

    pub fn split(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        // byte position of every char, plus the end of the string
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(byte_idx, _)| byte_idx)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let mut chunks = Vec::new();
        if total_chars == 0 {
            return chunks;
        }

        let step = self.config.chunk_size - self.config.chunk_overlap;
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(total_chars);
            chunks.push(Chunk {
                id: chunk_id(document_id, start),
                source_document_id: document_id.to_string(),
                index: chunks.len(),
                text: text[boundaries[start]..boundaries[end]].to_string(),
                start_offset: start,
                end_offset: end,
            });

            if end == total_chars {
                break;
            }
            start += step;
        }

        chunks
    }
}
