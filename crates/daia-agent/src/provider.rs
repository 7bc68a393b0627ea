use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single message in the conversation sent to a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    /// Normalized history followed by the current prompt as the last user turn.
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// One backend family's HTTP adapter.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send one chat request and wait for the full response. No retries.
    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("unsupported backend '{name}' (supported: {supported})")]
    UnsupportedBackend { name: String, supported: String },

    #[error("backend {backend} requires {field}")]
    MissingCredential {
        backend: &'static str,
        field: &'static str,
    },

    #[error("operation cancelled")]
    Cancelled,
}

/// Map 429 and other non-success statuses to `ProviderError`, passing
/// successful responses through.
pub(crate) async fn check_status(
    resp: reqwest::Response,
    provider: &str,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|s| s * 1000)
            .unwrap_or(5000);
        return Err(ProviderError::RateLimited {
            retry_after_ms: retry,
        });
    }

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        warn!(provider, status, body = %text, "model API error");
        return Err(ProviderError::Api {
            status,
            message: text,
        });
    }

    Ok(resp)
}
