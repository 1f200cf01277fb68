//! SQLite-backed vector store.
//!
//! Records live in one table; search is brute-force cosine similarity over
//! the (optionally namespace-filtered) rows.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use super::store::{RecordMetadata, RetrievalHit, VectorRecord, VectorStore};
use crate::core::errors::ApiError;

const RECORD_COLUMNS: &str = "id, document_id, namespace, source, chunk_index, start_offset, end_offset, content, embedding, ingested_at";

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn with_path(db_path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::store)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_records (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                ingested_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_records_namespace ON vector_records(namespace)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_records_document ON vector_records(document_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rag_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;

        Ok(())
    }

    /// Wipes every record when the stored vectors came from a different
    /// embedding model. Returns `true` when a wipe happened.
    pub async fn ensure_embedding_model(&self, embedding_model: &str) -> Result<bool, ApiError> {
        let stored = self.meta_value("embedding_model").await?;
        if stored.as_deref() == Some(embedding_model) {
            return Ok(false);
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::store)?;
        let reset = stored.is_some();
        if reset {
            let removed = sqlx::query("DELETE FROM vector_records")
                .execute(&mut *tx)
                .await
                .map_err(ApiError::store)?
                .rows_affected();
            sqlx::query("DELETE FROM rag_meta WHERE key = 'dimensions'")
                .execute(&mut *tx)
                .await
                .map_err(ApiError::store)?;
            tracing::warn!(
                previous = stored.as_deref().unwrap_or_default(),
                current = embedding_model,
                removed,
                "Embedding model changed; cleared vector store"
            );
        }

        set_meta(&mut tx, "embedding_model", embedding_model).await?;
        tx.commit().await.map_err(ApiError::store)?;
        Ok(reset)
    }

    async fn meta_value(&self, key: &str) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::store)
    }

    /// Forgets the fixed dimensionality once the store is empty again.
    async fn reset_dimensions_if_empty(&self) -> Result<(), ApiError> {
        sqlx::query(
            "DELETE FROM rag_meta WHERE key = 'dimensions'
             AND NOT EXISTS (SELECT 1 FROM vector_records)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::store)?;
        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn row_to_metadata(row: &SqliteRow) -> RecordMetadata {
        let ingested_at: String = row.get("ingested_at");
        let ingested_at = DateTime::parse_from_rfc3339(&ingested_at)
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_default();

        RecordMetadata {
            document_id: row.get("document_id"),
            namespace: row.get("namespace"),
            source: row.get("source"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            start_offset: row.get::<i64, _>("start_offset") as usize,
            end_offset: row.get::<i64, _>("end_offset") as usize,
            text: row.get("content"),
            ingested_at,
        }
    }
}

async fn set_meta(tx: &mut Transaction<'_, Sqlite>, key: &str, value: &str) -> Result<(), ApiError> {
    sqlx::query(
        "INSERT OR REPLACE INTO rag_meta (key, value, updated_at)
         VALUES (?1, ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await
    .map_err(ApiError::store)?;
    Ok(())
}

/// Every vector in the batch must match the store's fixed dimensionality,
/// which the first write establishes.
async fn check_dimensions(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[VectorRecord],
) -> Result<(), ApiError> {
    let Some(first) = records.first() else {
        return Ok(());
    };
    let dimensions = first.vector.len();
    if dimensions == 0 {
        return Err(ApiError::BadRequest(format!(
            "Record '{}' has an empty vector",
            first.id
        )));
    }
    if let Some(bad) = records.iter().find(|r| r.vector.len() != dimensions) {
        return Err(ApiError::BadRequest(format!(
            "Record '{}' has {} dimensions, expected {}",
            bad.id,
            bad.vector.len(),
            dimensions
        )));
    }

    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM rag_meta WHERE key = 'dimensions'")
            .fetch_optional(&mut **tx)
            .await
            .map_err(ApiError::store)?;

    match stored.and_then(|value| value.parse::<usize>().ok()) {
        Some(expected) if expected != dimensions => Err(ApiError::BadRequest(format!(
            "Embedding dimensionality mismatch: store holds {}, got {}",
            expected, dimensions
        ))),
        Some(_) => Ok(()),
        None => set_meta(tx, "dimensions", &dimensions.to_string()).await,
    }
}

async fn write_records(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[VectorRecord],
) -> Result<(), ApiError> {
    check_dimensions(tx, records).await?;

    for record in records {
        let blob = SqliteVectorStore::serialize_embedding(&record.vector);
        let meta = &record.metadata;

        sqlx::query(
            "INSERT OR REPLACE INTO vector_records
                (id, document_id, namespace, source, chunk_index, start_offset, end_offset, content, embedding, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&record.id)
        .bind(&meta.document_id)
        .bind(&meta.namespace)
        .bind(&meta.source)
        .bind(meta.chunk_index as i64)
        .bind(meta.start_offset as i64)
        .bind(meta.end_offset as i64)
        .bind(&meta.text)
        .bind(&blob)
        .bind(meta.ingested_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .map_err(ApiError::store)?;
    }

    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), ApiError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::store)?;
        write_records(&mut tx, &records).await?;
        tx.commit().await.map_err(ApiError::store)?;
        Ok(())
    }

    async fn replace_document(
        &self,
        document_id: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::store)?;

        let removed = sqlx::query("DELETE FROM vector_records WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::store)?
            .rows_affected();
        write_records(&mut tx, &records).await?;

        tx.commit().await.map_err(ApiError::store)?;
        if removed > 0 {
            tracing::debug!(document_id, removed, "Replaced previous document version");
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<RetrievalHit>, ApiError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM vector_records WHERE (?1 IS NULL OR namespace = ?1)",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::store)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let stored = Self::deserialize_embedding(&embedding_bytes);
            if stored.len() != vector.len() {
                return Err(ApiError::upstream(format!(
                    "Query embedding has {} dimensions, store holds {}",
                    vector.len(),
                    stored.len()
                )));
            }
            scored.push(RetrievalHit {
                id: row.get("id"),
                score: Self::cosine_similarity(vector, &stored),
                metadata: Self::row_to_metadata(row),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(top_k);

        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM vector_records WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::store)?;

        self.reset_dimensions_if_empty().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, namespace: Option<&str>) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM vector_records WHERE (?1 IS NULL OR namespace = ?1)",
        )
        .bind(namespace)
        .fetch_one(&self.pool)
        .await
        .map_err(ApiError::store)?;

        Ok(count as usize)
    }

    async fn clear(&self, namespace: Option<&str>) -> Result<usize, ApiError> {
        let result =
            sqlx::query("DELETE FROM vector_records WHERE (?1 IS NULL OR namespace = ?1)")
                .bind(namespace)
                .execute(&self.pool)
                .await
                .map_err(ApiError::store)?;

        self.reset_dimensions_if_empty().await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, SqliteVectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::with_path(dir.path().join("vectors.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn record(id: &str, document_id: &str, namespace: &str, text: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: RecordMetadata {
                document_id: document_id.to_string(),
                namespace: namespace.to_string(),
                source: "text".to_string(),
                chunk_index: 0,
                start_offset: 0,
                end_offset: text.chars().count(),
                text: text.to_string(),
                ingested_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn upsert_and_query() {
        let (_dir, store) = test_store().await;

        store
            .upsert(vec![record("c1", "d1", "default", "Hello world", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);

        let hits = store.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
        assert_eq!(hits[0].metadata.text, "Hello world");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn upsert_with_existing_id_replaces_vector_and_metadata() {
        let (_dir, store) = test_store().await;

        store
            .upsert(vec![record("c1", "d1", "default", "old text", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(vec![record("c1", "d1", "default", "new text", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.count(None).await.unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(hits[0].metadata.text, "new text");
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn query_is_sorted_and_bounded_by_top_k() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![
                record("a", "d", "default", "a", vec![0.8, 0.2]),
                record("b", "d", "default", "b", vec![0.1, 0.9]),
                record("c", "d", "default", "c", vec![0.9, 0.0]),
                record("e", "d", "default", "e", vec![0.5, 0.5]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 3, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "e"]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        assert!(store.query(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
        assert_eq!(store.query(&[1.0, 0.0], 50, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn query_filters_by_namespace() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![
                record("a", "d1", "alpha", "a", vec![1.0, 0.0]),
                record("b", "d2", "beta", "b", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, Some("beta")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(store.count(Some("alpha")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_document_drops_stale_chunks() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![
                record("d1#0", "d1", "default", "one", vec![1.0, 0.0]),
                record("d1#10", "d1", "default", "two", vec![1.0, 0.0]),
                record("d2#0", "d2", "default", "other", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        store
            .replace_document("d1", vec![record("d1#0", "d1", "default", "only", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.count(None).await.unwrap(), 2);
        let hits = store.query(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].metadata.text, "only");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected_until_cleared() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![record("a", "d", "default", "a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .upsert(vec![record("b", "d", "default", "b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(store.count(None).await.unwrap(), 1);

        let ragged = store
            .upsert(vec![
                record("c", "d", "default", "c", vec![1.0, 0.0]),
                record("e", "d", "default", "e", vec![1.0]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(ragged, ApiError::BadRequest(_)));

        assert_eq!(store.clear(None).await.unwrap(), 1);
        store
            .upsert(vec![record("b", "d", "default", "b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_with_foreign_dimensionality_is_upstream_error() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![record("a", "d", "default", "a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store.query(&[1.0, 0.0, 0.0], 3, None).await.unwrap_err();

        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn delete_document_and_clear_namespace() {
        let (_dir, store) = test_store().await;
        store
            .upsert(vec![
                record("a", "d1", "alpha", "a", vec![1.0]),
                record("b", "d1", "alpha", "b", vec![1.0]),
                record("c", "d2", "beta", "c", vec![1.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_document("d1").await.unwrap(), 2);
        assert_eq!(store.delete_document("d1").await.unwrap(), 0);
        assert_eq!(store.clear(Some("beta")).await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn changing_embedding_model_wipes_records() {
        let (_dir, store) = test_store().await;

        assert!(!store.ensure_embedding_model("embed-v1").await.unwrap());
        store
            .upsert(vec![record("a", "d", "default", "a", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert!(!store.ensure_embedding_model("embed-v1").await.unwrap());
        assert_eq!(store.count(None).await.unwrap(), 1);

        assert!(store.ensure_embedding_model("embed-v2").await.unwrap());
        assert_eq!(store.count(None).await.unwrap(), 0);

        store
            .upsert(vec![record("a", "d", "default", "a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        let model = store.meta_value("embedding_model").await.unwrap();
        assert_eq!(model.as_deref(), Some("embed-v2"));
    }

    #[test]
    fn embedding_blob_round_trips() {
        let vector = vec![0.25, -1.5, 3.0];
        let bytes = SqliteVectorStore::serialize_embedding(&vector);
        assert_eq!(SqliteVectorStore::deserialize_embedding(&bytes), vector);
    }
}
