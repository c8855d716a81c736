//! Chat-completion client for OpenAI-compatible APIs (e.g. Groq).
//!
//! The [`ChatApi`] trait is the seam between the pipeline and the upstream
//! model: the generator, query rewriter, judge, and summarizer all speak
//! through it, and tests substitute a scripted implementation. The HTTP
//! client issues a single bounded-timeout request per call; retry policy
//! belongs to callers, most of whom degrade instead of retrying.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::LlmConfig;

/// One message in a chat-completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Parameters for one completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Upstream failure taxonomy. Callers branch on the variant to decide
/// between degrading and propagating; the message is kept for diagnostics.
#[derive(Debug)]
pub enum LlmError {
    /// The request exceeded the configured timeout.
    Timeout(String),
    /// The API answered with a non-2xx status.
    Status { status: u16, body: String },
    /// The response body did not match the expected shape.
    Malformed(String),
    /// Connection-level failure (DNS, TLS, refused, ...).
    Transport(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Timeout(m) => write!(f, "model call timed out: {}", m),
            LlmError::Status { status, body } => {
                write!(f, "model API error {}: {}", status, body)
            }
            LlmError::Malformed(m) => write!(f, "malformed model response: {}", m),
            LlmError::Transport(m) => write!(f, "model transport error: {}", m),
        }
    }
}

impl std::error::Error for LlmError {}

/// Abstract chat-completion backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpChatClient {
    /// Build the client from config. The API key comes from the
    /// environment variable named in `llm.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatApi for HttpChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        extract_content(&json)
    }
}

/// Pull `choices[0].message.content` out of a completion response.
fn extract_content(json: &serde_json::Value) -> Result<String, LlmError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content_ok() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Article 21."}}]
        });
        assert_eq!(extract_content(&json).unwrap(), "Article 21.");
    }

    #[test]
    fn test_extract_content_missing() {
        let json = serde_json::json!({"choices": []});
        assert!(matches!(
            extract_content(&json),
            Err(LlmError::Malformed(_))
        ));

        let json = serde_json::json!({"error": "overloaded"});
        assert!(matches!(
            extract_content(&json),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let e = LlmError::Status {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert!(e.to_string().contains("503"));
        assert!(LlmError::Timeout("30s".into()).to_string().contains("timed out"));
    }
}
