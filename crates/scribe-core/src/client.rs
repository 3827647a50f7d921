//! OpenAI-compatible chat completion client

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::message::{ChatRequest, ChatResponse, CompletionBody};
use crate::retry::RetryConfig;

/// Anything that can answer a chat completion request
///
/// The agent loop talks to this trait so it can be driven by a scripted
/// backend in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError>;
}

/// HTTP client for `POST {base_url}/chat/completions`
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl ChatClient {
    /// Create a new client with the given request timeout
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Single attempt, no retries
    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        parse_completion(&text)
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transient chat API error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a completion body into its first choice
pub fn parse_completion(body: &str) -> Result<ChatResponse, ApiError> {
    let parsed: CompletionBody =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;

    let usage = parsed.usage;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or(ApiError::EmptyResponse)?;

    debug!(
        finish_reason = ?choice.finish_reason,
        tool_calls = choice.message.requested_tools().len(),
        prompt_tokens = usage.map(|u| u.prompt_tokens),
        "Parsed chat completion"
    );

    Ok(ChatResponse {
        message: choice.message,
        finish_reason: choice.finish_reason,
        usage,
    })
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatMessage, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const OK_BODY: &str = r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#;

    fn instant_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    async fn read_request(stream: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serves `failures` responses with `status`, then 200s, counting requests
    async fn stub_server(status: u16, failures: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut stream).await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                let (code, body) = if seen < failures {
                    (status, r#"{"error": "unavailable"}"#)
                } else {
                    (200, OK_BODY)
                };
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    code,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (url, hits) = stub_server(503, 2).await;
        let client = ChatClient::new(url, "key", Duration::from_secs(5))
            .unwrap()
            .with_retry(instant_retry(2));

        let resp = client.complete(&request()).await.unwrap();
        assert_eq!(resp.message.content, "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (url, hits) = stub_server(429, 10).await;
        let client = ChatClient::new(url, "key", Duration::from_secs(5))
            .unwrap()
            .with_retry(instant_retry(3));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 429, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let (url, hits) = stub_server(401, 10).await;
        let client = ChatClient::new(url, "key", Duration::from_secs(5))
            .unwrap()
            .with_retry(instant_retry(3));

        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ApiError::Http { status: 401, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_tool_call_completion() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "create_project", "arguments": "{\"project_name\": \"story\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
        }"#;

        let resp = parse_completion(body).unwrap();
        assert_eq!(resp.message.role, Role::Assistant);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.message.requested_tools()[0].id, "call_abc");
        assert_eq!(resp.usage.unwrap().total_tokens, 150);
    }

    #[test]
    fn test_parse_text_completion_without_usage() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "All done."}}]}"#;
        let resp = parse_completion(body).unwrap();
        assert_eq!(resp.message.content, "All done.");
        assert!(resp.message.tool_calls.is_none());
        assert!(resp.usage.is_none());
    }

    #[test]
    fn test_parse_empty_choices() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ApiError::EmptyResponse));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_completion("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ChatClient::new(
            "https://api.example.com/v4/",
            "key",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v4");
        assert_eq!(
            client.completions_url(),
            "https://api.example.com/v4/chat/completions"
        );
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(800);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.len(), 503);
    }
}
