//! Google Gemini (Generative Language API) provider with API-key auth.
//!
//! History roles map `assistant` → `model`; the system prompt travels in the
//! separate `systemInstruction` field. When grounding is enabled the request
//! carries the `google_search` tool so the model may cite live results.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend::BackendKind;
use crate::provider::{check_status, ChatRequest, ChatResponse, LlmProvider, ProviderError, Role};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    google_search: bool,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, google_search: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            google_search,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    fn build_body(&self, req: &ChatRequest) -> serde_json::Value {
        let contents: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => BackendKind::Gemini.assistant_label(),
                    Role::User | Role::System => "user",
                };
                serde_json::json!({
                    "role": role,
                    "parts": [{ "text": m.content }]
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": req.temperature,
                "maxOutputTokens": req.max_tokens,
            }
        });

        if !req.system.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{ "text": req.system }]
            });
        }
        if self.google_search {
            body["tools"] = serde_json::json!([{ "google_search": {} }]);
        }

        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = self.endpoint(&req.model);
        let body = self.build_body(req);

        debug!(model = %req.model, grounding = self.google_search, "sending request to Gemini");

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp, "gemini").await?;

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp, &req.model))
    }
}

fn parse_response(api_resp: GeminiResponse, model: &str) -> ChatResponse {
    let candidate = api_resp.candidates.into_iter().next();
    let content = candidate
        .as_ref()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    let stop_reason = candidate.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        content,
        model: model.to_string(),
        tokens_in: api_resp
            .usage_metadata
            .as_ref()
            .map(|u| u.prompt_token_count)
            .unwrap_or(0),
        tokens_out: api_resp
            .usage_metadata
            .as_ref()
            .map(|u| u.candidates_token_count)
            .unwrap_or(0),
        stop_reason,
    }
}

// ── Response types ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    // Missing when the candidate was blocked by safety filters.
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gemini-2.5-flash".into(),
            system: "you are daia".into(),
            messages: vec![Message::user("hi"), Message::assistant("hey"), Message::user("yo")],
            max_tokens: 100,
            temperature: 1.0,
        }
    }

    #[test]
    fn assistant_turns_use_model_role() {
        let provider = GeminiProvider::new("k".into(), None, false);
        let body = provider.build_body(&request());

        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "yo");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "you are daia");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn grounding_adds_search_tool() {
        let provider = GeminiProvider::new("k".into(), None, true);
        let body = provider.build_body(&request());
        assert!(body["tools"][0].get("google_search").is_some());
    }

    #[test]
    fn endpoint_embeds_model() {
        let provider = GeminiProvider::new("k".into(), Some("http://local/v1beta/".into()), false);
        assert_eq!(
            provider.endpoint("gemini-2.5-pro"),
            "http://local/v1beta/models/gemini-2.5-pro:generateContent"
        );
    }

    #[test]
    fn parts_are_concatenated_and_blocked_candidates_are_empty() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}],
                      "usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2}}"#;
        let parsed = parse_response(serde_json::from_str(raw).unwrap(), "m");
        assert_eq!(parsed.content, "ab");
        assert_eq!(parsed.tokens_out, 2);

        let blocked = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed = parse_response(serde_json::from_str(blocked).unwrap(), "m");
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.stop_reason, "SAFETY");
    }
}
