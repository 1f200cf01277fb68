use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::namespace_filter;
use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct NamespaceParams {
    pub namespace: Option<String>,
}

pub async fn index_info(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<NamespaceParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;
    let namespace = namespace_filter(params.namespace.as_deref());
    let count = state.store().count(namespace.as_deref()).await?;
    Ok(Json(json!({"status": "ok", "count": count})))
}

pub async fn clear_index(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<NamespaceParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;
    let namespace = namespace_filter(params.namespace.as_deref());
    let removed = state.store().clear(namespace.as_deref()).await?;
    tracing::info!(
        namespace = namespace.as_deref().unwrap_or("*"),
        removed,
        "Cleared index"
    );
    Ok(Json(json!({"status": "cleared", "removed": removed})))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.admin_key)?;
    let removed = state.store().delete_document(&document_id).await?;
    if removed == 0 {
        return Err(ApiError::NotFound(format!(
            "Document '{}' not found",
            document_id
        )));
    }
    tracing::info!(document_id = %document_id, removed, "Deleted document");
    Ok(Json(json!({"status": "deleted", "removed": removed})))
}
