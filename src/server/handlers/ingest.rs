use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::namespace_or_default;
use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::rag::{Document, UploadedDocument};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestTextRequest {
    #[serde(default)]
    pub texts: Vec<String>,
    pub namespace: Option<String>,
}

pub async fn ingest_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<IngestTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;

    if payload.texts.is_empty() {
        return Err(ApiError::BadRequest("No texts provided.".to_string()));
    }
    if payload.texts.iter().any(|text| text.trim().is_empty()) {
        return Err(ApiError::BadRequest("Texts must not be blank.".to_string()));
    }

    let namespace = namespace_or_default(payload.namespace.as_deref());
    let mut indexed_chunks = 0;
    let mut documents = Vec::with_capacity(payload.texts.len());
    for text in payload.texts {
        let report = state.rag.ingest(&Document::from_text(&namespace, text)).await?;
        indexed_chunks += report.chunks;
        documents.push(json!({
            "document_id": report.document_id,
            "chunks": report.chunks,
        }));
    }

    Ok(Json(json!({
        "status": "ok",
        "indexed_chunks": indexed_chunks,
        "documents": documents,
    })))
}

pub async fn ingest_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;

    let mut upload: Option<UploadedDocument> = None;
    let mut namespace: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Invalid multipart body: {}", err)))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read file: {}", err)))?;
                upload = Some(UploadedDocument::classify(&file_name, bytes.to_vec())?);
            }
            Some("namespace") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Invalid namespace: {}", err)))?;
                namespace = Some(value);
            }
            _ => {}
        }
    }

    let upload =
        upload.ok_or_else(|| ApiError::BadRequest("Missing 'file' field.".to_string()))?;
    let namespace = namespace_or_default(namespace.as_deref());
    let document = Document::from_upload(&namespace, &upload)?;
    let report = state.rag.ingest(&document).await?;

    Ok(Json(json!({
        "status": "ok",
        "indexed_chunks": report.chunks,
        "file": report.source,
        "document_id": report.document_id,
    })))
}
