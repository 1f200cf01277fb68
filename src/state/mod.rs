use std::sync::Arc;
use std::time::Duration;

use crate::core::config::service::redacted;
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::core::security::AdminKey;
use crate::llm::{LlmProvider, OpenAiProvider};
use crate::rag::{RagService, SqliteVectorStore, VectorStore};
use crate::server::rate_limit::QueryLimiter;

pub mod error;

use error::InitializationError;

/// Process-wide state shared by every route.
///
/// Built once at startup; afterwards only the contents of the vector store
/// change.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub admin_key: AdminKey,
    pub rag: RagService,
    pub query_limiter: Option<QueryLimiter>,
}

impl AppState {
    /// Loads configuration, opens the vector store and wires the OpenAI
    /// provider into the RAG pipeline.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone());
        let settings = config
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;
        if let Ok(effective) = serde_json::to_value(&settings) {
            tracing::info!("Effective configuration: {}", redacted(effective));
        }

        if settings.openai.api_key.is_none() {
            tracing::warn!(
                "OPENAI_API_KEY is not set; embedding and completion calls will be unauthenticated"
            );
        }

        let store_path = settings
            .store
            .path
            .clone()
            .unwrap_or_else(|| paths.store_file());
        let store = SqliteVectorStore::with_path(&store_path)
            .await
            .map_err(|e| InitializationError::Store(e.into()))?;
        if store
            .ensure_embedding_model(&settings.openai.embedding_model)
            .await
            .map_err(|e| InitializationError::Store(e.into()))?
        {
            tracing::warn!(
                model = %settings.openai.embedding_model,
                "Embedding model changed; the vector store was cleared"
            );
        }

        let provider = OpenAiProvider::new(
            &settings.openai.base_url,
            settings.openai.api_key.as_deref(),
            Duration::from_secs(settings.openai.request_timeout_secs),
        )
        .map_err(|e| InitializationError::Llm(e.into()))?;

        let admin_key =
            AdminKey::resolve(settings.auth.admin_api_key.as_deref(), &paths.admin_key_file());

        Self::from_parts(
            settings,
            admin_key,
            Arc::new(provider),
            Arc::new(store),
        )
    }

    /// Assembles state from already-built collaborators.
    pub fn from_parts(
        settings: Settings,
        admin_key: AdminKey,
        provider: Arc<dyn LlmProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Arc<Self>, InitializationError> {
        let rag = RagService::new(&settings, provider, store)
            .map_err(|e| InitializationError::Pipeline(e.into()))?;
        let query_limiter = QueryLimiter::per_day(settings.rate_limit.max_daily_requests);

        Ok(Arc::new(AppState {
            settings: Arc::new(settings),
            admin_key,
            rag,
            query_limiter,
        }))
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        self.rag.store()
    }
}
