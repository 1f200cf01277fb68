use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use serde_json::{json, Value};
use tower::ServiceExt;

use docchat_backend::core::config::{AppPaths, Settings};
use docchat_backend::core::errors::ApiError;
use docchat_backend::core::security::AdminKey;
use docchat_backend::llm::{ChatRequest, LlmProvider};
use docchat_backend::rag::SqliteVectorStore;
use docchat_backend::server;
use docchat_backend::state::AppState;

const API_KEY: &str = "test-admin-key";
const VOCABULARY: [&str; 8] = ["sky", "blue", "grass", "green", "color", "the", "is", "what"];

/// Bag-of-words embeddings over a tiny vocabulary, and a chat model that
/// echoes the first context passage.
#[derive(Default)]
struct FakeProvider {
    embed_calls: AtomicUsize,
    chat_calls: AtomicUsize,
    down: AtomicBool,
}

impl FakeProvider {
    fn calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst) + self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ApiError::upstream("connection refused"));
        }
        let prompt = &request.messages[1].content;
        let context = prompt.split("Context:\n").nth(1).unwrap_or_default();
        let first = context.split("\n\n").next().unwrap_or_default();
        Ok(format!(" {} ", first))
    }

    async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ApiError::upstream("connection refused"));
        }
        Ok(inputs
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let words: Vec<&str> = lower
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .collect();
                VOCABULARY
                    .iter()
                    .map(|term| words.iter().filter(|w| *w == term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    provider: Arc<FakeProvider>,
    router: Router,
}

impl TestApp {
    async fn new(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::with_data_dir(dir.path());
        let mut settings = Settings::default();
        settings.rag.chunk_size = 200;
        settings.rag.chunk_overlap = 20;
        configure(&mut settings);

        let store = SqliteVectorStore::with_path(&paths.store_file()).await.unwrap();
        let provider = Arc::new(FakeProvider::default());
        let state = AppState::from_parts(
            settings,
            AdminKey::new(API_KEY),
            provider.clone(),
            Arc::new(store),
        )
        .unwrap();

        Self {
            _dir: dir,
            provider,
            router: server::router(state),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .header("x-api-key", API_KEY)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn count(&self) -> u64 {
        let response = self
            .send(
                Request::get("/index/info")
                    .header("x-api-key", API_KEY)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await["count"].as_u64().unwrap()
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_request(file_name: &str, content: &[u8], namespace: Option<&str>) -> Request<Body> {
    let boundary = "docchat-test-boundary";
    let mut body = Vec::new();
    if let Some(ns) = namespace {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"namespace\"\r\n\r\n{ns}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/ingest/upload")
        .header("x-api-key", API_KEY)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// A single-page PDF drawing each line with `Tj`.
fn pdf_bytes(lines: &[&str]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-16).into()]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations }.encode().unwrap();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::from(page_id)],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[tokio::test]
async fn health_needs_no_key() {
    let app = TestApp::new(|_| {}).await;
    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn answers_from_the_most_relevant_chunk() {
    let app = TestApp::new(|_| {}).await;

    let response = app
        .post_json(
            "/ingest/text",
            json!({"texts": ["The sky is blue.", "Grass is green."]}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["indexed_chunks"], 2);
    assert_eq!(body["documents"].as_array().unwrap().len(), 2);

    let response = app
        .post_json("/query", json!({"query": "What color is the sky?", "k": 2}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let retrieved = body["retrieved"].as_array().unwrap();
    assert_eq!(retrieved.len(), 2);
    assert_eq!(retrieved[0]["text_preview"], "The sky is blue.");
    assert!(retrieved[0]["score"].as_f64().unwrap() > retrieved[1]["score"].as_f64().unwrap());
    assert!(body["answer"].as_str().unwrap().contains("blue"));
    assert_eq!(body["used_chunk_ids"][0], retrieved[0]["chunk_id"]);
}

#[tokio::test]
async fn reingesting_the_same_text_does_not_duplicate() {
    let app = TestApp::new(|_| {}).await;

    for _ in 0..2 {
        let response = app
            .post_json("/ingest/text", json!({"texts": ["The sky is blue."]}))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(app.count().await, 1);
}

#[tokio::test]
async fn missing_or_wrong_key_is_rejected_before_any_provider_call() {
    let app = TestApp::new(|_| {}).await;

    for key in [None, Some("wrong-key")] {
        let mut request = Request::post("/query").header("content-type", "application/json");
        if let Some(key) = key {
            request = request.header("x-api-key", key);
        }
        let response = app
            .send(
                request
                    .body(Body::from(json!({"query": "sky?"}).to_string()))
                    .unwrap(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["error"],
            "Invalid or missing X-API-KEY header."
        );
    }

    let response = app
        .send(
            Request::post("/ingest/text")
                .header("content-type", "application/json")
                .body(Body::from(json!({"texts": ["The sky is blue."]}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn embedding_outage_during_ingest_is_502_and_stores_nothing() {
    let app = TestApp::new(|_| {}).await;
    app.provider.down.store(true, Ordering::SeqCst);

    let response = app
        .post_json("/ingest/text", json!({"texts": ["The sky is blue."]}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(json_body(response).await["error"]
        .as_str()
        .unwrap()
        .starts_with("Upstream service unavailable"));

    app.provider.down.store(false, Ordering::SeqCst);
    assert_eq!(app.count().await, 0);
}

#[tokio::test]
async fn query_against_empty_index_skips_the_completion_call() {
    let app = TestApp::new(|_| {}).await;

    let response = app.post_json("/query", json!({"query": "sky?"})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    assert_eq!(body["answer"], "I don't know based on provided documents.");
    assert!(body["retrieved"].as_array().unwrap().is_empty());
    assert_eq!(app.provider.chat_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_requests_are_400() {
    let app = TestApp::new(|_| {}).await;

    let cases = [
        ("/ingest/text", json!({"texts": []})),
        ("/ingest/text", json!({"texts": ["ok", "   "]})),
        ("/query", json!({"query": "   "})),
        ("/query", json!({"query": "sky?", "k": 0})),
    ];
    for (uri, body) in cases {
        let response = app.post_json(uri, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", uri, body);
    }
    assert_eq!(app.provider.calls(), 0);
}

#[tokio::test]
async fn upload_indexes_text_files_by_name() {
    let app = TestApp::new(|_| {}).await;

    let response = app
        .send(multipart_request("Notes.txt", b"The sky is blue.\n\nGrass is green.", Some("team")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file"], "notes.txt");
    assert_eq!(body["document_id"], "team:file:notes.txt");
    assert_eq!(body["indexed_chunks"], 1);

    let response = app
        .send(multipart_request("image.png", b"\x89PNG", None))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"],
        "Unsupported file type. Use .pdf or .txt"
    );
}

#[tokio::test]
async fn uploaded_pdf_text_is_indexed_and_answerable() {
    let app = TestApp::new(|_| {}).await;

    let pdf = pdf_bytes(&["The sky is blue.", "Grass is green."]);
    let response = app.send(multipart_request("Facts.pdf", &pdf, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["file"], "facts.pdf");
    assert_eq!(body["document_id"], "default:file:facts.pdf");
    assert!(body["indexed_chunks"].as_u64().unwrap() >= 1);

    let response = app
        .post_json("/query", json!({"query": "What color is the sky?"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["retrieved"][0]["metadata"]["source"], "facts.pdf");
    assert!(body["answer"].as_str().unwrap().contains("The sky is blue."));
}

#[tokio::test]
async fn documents_can_be_deleted_and_namespaces_cleared() {
    let app = TestApp::new(|_| {}).await;
    app.post_json(
        "/ingest/text",
        json!({"texts": ["The sky is blue."], "namespace": "a"}),
    )
    .await;
    let body = json_body(
        app.post_json(
            "/ingest/text",
            json!({"texts": ["Grass is green."], "namespace": "b"}),
        )
        .await,
    )
    .await;
    let document_id = body["documents"][0]["document_id"].as_str().unwrap().to_string();

    let delete = |id: String| {
        Request::delete(format!("/documents/{}", id))
            .header("x-api-key", API_KEY)
            .body(Body::empty())
            .unwrap()
    };
    let response = app.send(delete(document_id.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["removed"], 1);

    let response = app.send(delete(document_id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .send(
            Request::post("/index/clear?namespace=a")
                .header("x-api-key", API_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"status": "cleared", "removed": 1})
    );
    assert_eq!(app.count().await, 0);
}

#[tokio::test]
async fn query_quota_is_reported_and_enforced() {
    let app = TestApp::new(|settings| settings.rate_limit.max_daily_requests = 2).await;

    for expected in ["1", "0"] {
        let response = app.post_json("/query", json!({"query": "sky?"})).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-remaining-requests"], expected);
    }

    let response = app.post_json("/query", json!({"query": "sky?"})).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-remaining-requests"], "0");
    assert_eq!(
        json_body(response).await["error"],
        "Daily request limit reached"
    );

    let response = app
        .post_json("/ingest/text", json!({"texts": ["The sky is blue."]}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-remaining-requests").is_none());
}

#[tokio::test]
async fn zero_daily_limit_disables_the_quota() {
    let app = TestApp::new(|settings| settings.rate_limit.max_daily_requests = 0).await;

    for _ in 0..3 {
        let response = app.post_json("/query", json!({"query": "sky?"})).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
