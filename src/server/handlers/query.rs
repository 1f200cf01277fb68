use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::namespace_filter;
use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::rag::Query;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    pub k: Option<usize>,
    pub namespace: Option<String>,
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;

    let text = payload.query.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Empty query.".to_string()));
    }

    let rag = &state.settings.rag;
    let top_k = match payload.k {
        Some(0) => return Err(ApiError::BadRequest("k must be at least 1.".to_string())),
        Some(k) => k.min(rag.max_top_k),
        None => rag.top_k,
    };

    let query = Query {
        text: text.to_string(),
        top_k,
        namespace: namespace_filter(payload.namespace.as_deref()),
    };
    let (answer, hits) = state.rag.ask(&query).await?;

    let retrieved: Vec<Value> = hits
        .iter()
        .map(|hit| {
            json!({
                "chunk_id": hit.id,
                "score": hit.score,
                "text_preview": hit.metadata.excerpt(rag.context_preview_chars),
                "metadata": {
                    "document_id": hit.metadata.document_id,
                    "namespace": hit.metadata.namespace,
                    "source": hit.metadata.source,
                    "chunk_index": hit.metadata.chunk_index,
                    "start_offset": hit.metadata.start_offset,
                    "end_offset": hit.metadata.end_offset,
                    "ingested_at": hit.metadata.ingested_at,
                },
            })
        })
        .collect();

    Ok(Json(json!({
        "answer": answer.text,
        "used_chunk_ids": answer.used_chunk_ids,
        "retrieved": retrieved,
    })))
}
