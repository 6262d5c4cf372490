//! OpenAI-compatible completion provider.
//!
//! Works with: OpenAI, Anthropic's and Google AI Studio's OpenAI-compatible
//! endpoints, DeepSeek, OpenRouter, Ollama, and any other endpoint that
//! serves `/chat/completions`.

use async_trait::async_trait;
use rustedtavern_core::error::ProviderError;
use rustedtavern_core::message::Message;
use rustedtavern_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Seconds to wait when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// A provider speaking the OpenAI chat-completions API.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider. An empty `api_key` sends no `Authorization` header.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("{name}: HTTP client: {e}")))?;

        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(request: &ProviderRequest) -> ApiRequest<'_> {
        ApiRequest {
            model: &request.model,
            messages: request.messages.iter().map(ApiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Decode a 2xx body into the reply.
fn parse_completion(body: &str) -> Result<ProviderResponse, ProviderError> {
    let api_response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

    let content = choice
        .message
        .content
        .ok_or_else(|| ProviderError::MalformedResponse("Choice has no content".into()))?;

    Ok(ProviderResponse {
        content,
        usage: api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
        model: api_response.model.unwrap_or_default(),
    })
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending completion request"
        );

        let response = self
            .with_auth(self.client.post(&url))
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after(response.headers()),
            });
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = status.as_u16(), body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status.as_u16(),
                message: error_body,
            });
        }

        let body = response.text().await.map_err(send_error)?;
        let reply = parse_completion(&body)?;
        debug!(provider = %self.name, model = %reply.model, "Completion received");
        Ok(reply)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(send_error)?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ApiReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn http(status: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".into(),
            messages: vec![Message::system("You are Nia."), Message::user("hi")],
            temperature: 0.8,
            max_tokens: Some(64),
        }
    }

    fn provider(base_url: &str, key: &str) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new("test", base_url, key, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let req = request();
        let body = serde_json::to_value(OpenAiCompatProvider::request_body(&req)).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let p = provider("https://api.example.com/v1/", "");
        assert_eq!(p.base_url(), "https://api.example.com/v1");
        assert_eq!(p.name(), "test");
    }

    #[test]
    fn parses_reply_and_usage() {
        let reply = parse_completion(
            r#"{"model": "m", "choices": [{"message": {"role": "assistant", "content": "hey"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}}"#,
        )
        .unwrap();
        assert_eq!(reply.content, "hey");
        assert_eq!(reply.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn empty_choices_is_malformed() {
        assert!(matches!(
            parse_completion(r#"{"choices": []}"#),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_completion("<html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn successful_completion_sends_bearer_key() {
        let (url, server) = serve_once(http(
            "200 OK",
            "",
            r#"{"model": "test-model", "choices": [{"message": {"content": "hello Sam"}}]}"#,
        ))
        .await;

        let reply = provider(&url, "sk-test").complete(request()).await.unwrap();
        assert_eq!(reply.content, "hello Sam");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let (url, _server) = serve_once(http("429 Too Many Requests", "Retry-After: 17\r\n", "{}")).await;
        let err = provider(&url, "k").complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 17 }));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failure() {
        let (url, _server) = serve_once(http("401 Unauthorized", "", "{}")).await;
        let err = provider(&url, "bad").complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let (url, _server) = serve_once(http("503 Service Unavailable", "", "overloaded")).await;
        let err = provider(&url, "k").complete(request()).await.unwrap_err();
        match err {
            ProviderError::ApiError {
                status_code,
                message,
            } => {
                assert_eq!(status_code, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider(&format!("http://{addr}/v1"), "")
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }
}
