use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::security::API_KEY_HEADER;
use crate::server::handlers::{health, index, ingest, query};
use crate::server::rate_limit::{self, REMAINING_HEADER};
use crate::state::AppState;

/// Creates the application router.
///
/// Every route except `/health` checks the `x-api-key` header itself;
/// `/query` additionally passes through the per-client daily limiter.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_allowed_origins);
    let body_limit = DefaultBodyLimit::max(state.settings.server.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health))
        .route("/ingest/text", post(ingest::ingest_text))
        .route("/ingest/upload", post(ingest::ingest_upload))
        .route(
            "/query",
            post(query::query).route_layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit::limit_queries,
            )),
        )
        .route("/index/info", get(index::index_info))
        .route("/index/clear", post(index::clear_index))
        .route("/documents/:document_id", delete(index::delete_document))
        .with_state(state)
        .layer(body_limit)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let origins = configured
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect::<Vec<_>>();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([HeaderName::from_static(REMAINING_HEADER)])
}
