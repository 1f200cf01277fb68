//! Source documents and text extraction for uploaded files.

use std::sync::OnceLock;

use lopdf::Document as PdfDocument;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::errors::ApiError;

pub const DEFAULT_NAMESPACE: &str = "default";

/// A document ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub namespace: String,
    /// File name for uploads, `"text"` for inline texts.
    pub source: String,
    pub text: String,
}

impl Document {
    /// Inline text is identified by its content, so posting the same text
    /// twice replaces the earlier copy.
    pub fn from_text(namespace: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        Self {
            id: format!("{}:text:{}", namespace, &digest[..16]),
            namespace: namespace.to_string(),
            source: "text".to_string(),
            text,
        }
    }

    pub fn from_upload(namespace: &str, upload: &UploadedDocument) -> Result<Self, ApiError> {
        let text = upload.extract_text()?;
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "No text extracted from file.".to_string(),
            ));
        }
        let file_name = upload.file_name().to_lowercase();
        Ok(Self {
            id: format!("{}:file:{}", namespace, file_name),
            namespace: namespace.to_string(),
            source: file_name,
            text,
        })
    }
}

/// An uploaded file, classified by extension.
#[derive(Debug, Clone)]
pub enum UploadedDocument {
    Pdf { file_name: String, bytes: Vec<u8> },
    Text { file_name: String, bytes: Vec<u8> },
}

impl UploadedDocument {
    pub fn classify(file_name: &str, bytes: Vec<u8>) -> Result<Self, ApiError> {
        let file_name = file_name.trim().to_string();
        let lower = file_name.to_lowercase();
        if lower.ends_with(".pdf") {
            Ok(UploadedDocument::Pdf { file_name, bytes })
        } else if lower.ends_with(".txt") {
            Ok(UploadedDocument::Text { file_name, bytes })
        } else {
            Err(ApiError::BadRequest(
                "Unsupported file type. Use .pdf or .txt".to_string(),
            ))
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            UploadedDocument::Pdf { file_name, .. } | UploadedDocument::Text { file_name, .. } => {
                file_name
            }
        }
    }

    pub fn extract_text(&self) -> Result<String, ApiError> {
        match self {
            UploadedDocument::Pdf { bytes, .. } => extract_pdf_text(bytes),
            UploadedDocument::Text { bytes, .. } => {
                Ok(normalize_text(&String::from_utf8_lossy(bytes)))
            }
        }
    }
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, ApiError> {
    let doc = PdfDocument::load_mem(bytes)
        .map_err(|err| ApiError::BadRequest(format!("Unreadable PDF: {}", err)))?;

    let mut page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();

    let pages: Vec<String> = page_numbers
        .iter()
        .map(|page| {
            doc.extract_text(&[*page]).unwrap_or_else(|err| {
                tracing::debug!(page = *page, "Skipping PDF page without text: {}", err);
                String::new()
            })
        })
        .collect();

    Ok(normalize_text(&pages.join("\n")))
}

/// Collapses runs of horizontal whitespace, trims lines and drops blank ones.
fn normalize_text(text: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));

    text.lines()
        .map(|line| spaces.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
