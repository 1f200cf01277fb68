use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::provider::LlmProvider;
use super::types::{ChatMessage, ChatRequest};
use crate::core::errors::ApiError;

/// Client for OpenAI-compatible `/chat/completions` and `/embeddings` endpoints.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            let auth = format!("Bearer {}", key);
            let value = HeaderValue::from_str(&auth)
                .map_err(|_| ApiError::BadRequest("Invalid OpenAI API key".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, what: &str) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| ApiError::upstream(format!("{} request failed: {}", what, err)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ApiError::upstream(format!(
                "{} returned {}: {}",
                what, status, text
            )));
        }

        res.json::<R>()
            .await
            .map_err(|err| ApiError::upstream(format!("{} response malformed: {}", what, err)))
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let body = CompletionBody {
            model: model_id,
            messages: &request.messages,
            stream: false,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let payload: CompletionResponse = self
            .post_json("/chat/completions", &body, "Chat completion")
            .await?;

        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ApiError::upstream("Chat completion returned no choices"))
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingBody {
            model: model_id,
            input: inputs,
        };
        let mut payload: EmbeddingResponse =
            self.post_json("/embeddings", &body, "Embeddings").await?;

        payload.data.sort_by_key(|entry| entry.index);
        if payload.data.len() != inputs.len() {
            return Err(ApiError::upstream(format!(
                "Embeddings returned {} vectors for {} inputs",
                payload.data.len(),
                inputs.len()
            )));
        }

        Ok(payload
            .data
            .into_iter()
            .map(|entry| entry.embedding)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new(base_url, Some("sk-test"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn embed_restores_input_order_from_index() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "embed-small");
                assert_eq!(body["input"], json!(["first", "second"]));
                Json(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }))
            }),
        );
        let base = spawn_mock(router).await;

        let vectors = provider(&base)
            .embed(&["first".to_string(), "second".to_string()], "embed-small")
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn chat_sends_bearer_token_and_returns_content() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: AxumHeaders, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers.get("authorization").and_then(|v| v.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(body["messages"][0]["role"], "system");
                assert_eq!(body["max_tokens"], 50);
                Json(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "The sky is blue." } }]
                }))
            }),
        );
        let base = spawn_mock(router).await;

        let request = ChatRequest::new(vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("Sky color?"),
        ])
        .with_max_tokens(50);
        let answer = provider(&base).chat(request, "gpt-test").await.unwrap();

        assert_eq!(answer, "The sky is blue.");
    }

    #[tokio::test]
    async fn error_status_maps_to_upstream_unavailable() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base = spawn_mock(router).await;

        let err = provider(&base)
            .embed(&["x".to_string()], "embed-small")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::UpstreamUnavailable(ref msg) if msg.contains("429")));
    }

    #[tokio::test]
    async fn count_mismatch_is_rejected() {
        let router = Router::new().route(
            "/v1/embeddings",
            post(|| async { Json(json!({ "data": [{ "index": 0, "embedding": [1.0] }] })) }),
        );
        let base = spawn_mock(router).await;

        let err = provider(&base)
            .embed(&["a".to_string(), "b".to_string()], "embed-small")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_service_maps_to_upstream_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider(&format!("http://{}/v1", addr))
            .chat(ChatRequest::new(vec![ChatMessage::user("hi")]), "gpt-test")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::UpstreamUnavailable(_)));
    }
}
