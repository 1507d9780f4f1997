use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use reqwest::Client;
use serde::Serialize;

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::model::{is_reasoning_model, ReasoningEffort};
use crate::state::ChatMessage;

/// Raw body chunks of a streaming response, in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub enum CompletionResponse {
    /// Whole JSON body of a non-streaming call.
    Json(String),
    Stream(ChunkStream),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
    pub stream: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            reasoning_effort: ReasoningEffort::Medium,
            stream: true,
        }
    }
}

impl From<&Config> for CompletionOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_tokens: config.max_tokens,
            reasoning_effort: config.reasoning_effort,
            stream: config.stream,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    pub stream: bool,
}

impl CompletionRequest {
    /// The full history is always sent; nothing is truncated.
    pub fn new(model: &str, messages: &[ChatMessage], options: &CompletionOptions) -> Self {
        let (max_tokens, reasoning_effort) = if is_reasoning_model(model) {
            (None, Some(options.reasoning_effort))
        } else {
            (Some(options.max_tokens), None)
        };

        Self {
            model: model.to_string(),
            messages: messages.to_vec(),
            max_tokens,
            reasoning_effort,
            stream: options.stream,
        }
    }
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest, api_key: &str) -> Result<CompletionResponse>;
}

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    endpoint: String,
}

impl OpenAIClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAIClient {
    async fn complete(&self, request: &CompletionRequest, api_key: &str) -> Result<CompletionResponse> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending completion request"
        );

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if request.stream {
            let chunks = response.bytes_stream().map_err(ChatError::from);
            Ok(CompletionResponse::Stream(Box::pin(chunks)))
        } else {
            Ok(CompletionResponse::Json(response.text().await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::sse::{SseLine, SseLineDecoder};
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi there"),
            ChatMessage::user("explain lifetimes"),
        ]
    }

    #[test]
    fn test_request_for_chat_model_caps_tokens() {
        let request = CompletionRequest::new("gpt-4o", &history(), &CompletionOptions::default());
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["max_tokens"], json!(4000));
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][2], json!({"role": "user", "content": "explain lifetimes"}));
    }

    #[test]
    fn test_request_for_reasoning_model_uses_effort() {
        let request = CompletionRequest::new("o3-mini", &history(), &CompletionOptions::default());
        let body = serde_json::to_value(&request).unwrap();

        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["reasoning_effort"], json!("medium"));
    }

    #[tokio::test]
    async fn test_non_streaming_call_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hi!"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAIClient::new(&format!("{}/v1/chat/completions", server.uri()));
        let options = CompletionOptions {
            stream: false,
            ..CompletionOptions::default()
        };
        let request = CompletionRequest::new("gpt-4o", &history(), &options);

        match client.complete(&request, "sk-test").await.unwrap() {
            CompletionResponse::Json(body) => {
                assert_eq!(crate::ai::parse_completion(&body).unwrap(), "Hi!");
            }
            CompletionResponse::Stream(_) => panic!("expected a JSON body"),
        }
    }

    #[tokio::test]
    async fn test_streaming_call_yields_sse_lines() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(&server.uri());
        let request = CompletionRequest::new("gpt-4o", &history(), &CompletionOptions::default());

        let CompletionResponse::Stream(mut chunks) = client.complete(&request, "sk-test").await.unwrap() else {
            panic!("expected a stream");
        };

        let mut decoder = SseLineDecoder::new();
        let mut lines = Vec::new();
        while let Some(chunk) = chunks.next().await {
            lines.extend(decoder.feed(&chunk.unwrap()));
        }

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], SseLine::Done);
    }

    #[tokio::test]
    async fn test_error_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(&server.uri());
        let request = CompletionRequest::new("gpt-4o", &history(), &CompletionOptions::default());

        match client.complete(&request, "sk-bad").await {
            Err(ChatError::Api { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an error"),
        }
    }
}
