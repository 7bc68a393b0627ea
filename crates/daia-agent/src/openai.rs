use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::provider::{check_status, ChatRequest, ChatResponse, LlmProvider, ProviderError};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat Completions client. Serves both OpenAI itself and any server that
/// speaks the same protocol (Ollama, vLLM, LM Studio, OpenRouter, ...).
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    /// Base URL including the version segment, without trailing slash.
    base_url: String,
    label: &'static str,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self::with_label(api_key, base_url, "openai")
    }

    /// An OpenAI-compatible endpoint at `base_url` (e.g. `http://localhost:11434/v1`).
    pub fn compatible(api_key: String, base_url: String) -> Self {
        Self::with_label(api_key, Some(base_url), "openai_compatible")
    }

    fn with_label(api_key: String, base_url: Option<String>, label: &'static str) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            label,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.label
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(provider = self.label, model = %req.model, "sending chat completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp, self.label).await?;

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    // System prompt goes first as a system message; roles serialize as-is.
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];

    for m in &req.messages {
        messages.push(serde_json::json!({
            "role": m.role,
            "content": m.content,
        }));
    }

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
    })
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();
    let stop_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        stop_reason,
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;

    #[test]
    fn system_message_precedes_history() {
        let req = ChatRequest {
            model: "gpt-4o-mini".into(),
            system: "be brief".into(),
            messages: vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("kai: what time is it"),
            ],
            max_tokens: 256,
            temperature: 0.5,
        };
        let body = build_request_body(&req);
        let messages = body["messages"].as_array().unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "kai: what time is it");
        assert_eq!(body["max_tokens"], 256);
    }

    #[test]
    fn response_text_comes_from_first_choice() {
        let raw = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"content": "pong"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }"#;
        let parsed = parse_response(serde_json::from_str(raw).unwrap());
        assert_eq!(parsed.content, "pong");
        assert_eq!(parsed.stop_reason, "stop");
        assert_eq!(parsed.tokens_in, 3);
    }

    #[test]
    fn empty_choices_yield_empty_text() {
        let parsed = parse_response(serde_json::from_str(r#"{"choices": []}"#).unwrap());
        assert!(parsed.content.is_empty());
    }

    #[test]
    fn compatible_base_url_loses_trailing_slash() {
        let p = OpenAiProvider::compatible("k".into(), "http://localhost:11434/v1/".into());
        assert_eq!(p.base_url, "http://localhost:11434/v1");
        assert_eq!(p.name(), "openai_compatible");
    }
}
