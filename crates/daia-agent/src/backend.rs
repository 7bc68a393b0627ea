//! Backend selection: a closed set of model families chosen once at startup.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, info};

use daia_core::config::ChatConfig;

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai::OpenAiProvider;
use crate::pipeline::ChatModel;
use crate::provider::{ChatRequest, LlmProvider, Message, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Gemini,
    OpenAi,
    OpenAiCompatible,
    Anthropic,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Gemini,
        BackendKind::OpenAi,
        BackendKind::OpenAiCompatible,
        BackendKind::Anthropic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Gemini => "gemini",
            BackendKind::OpenAi => "openai",
            BackendKind::OpenAiCompatible => "openai_compatible",
            BackendKind::Anthropic => "anthropic",
        }
    }

    /// Wire label for the assistant role in this family's history format.
    pub fn assistant_label(self) -> &'static str {
        match self {
            BackendKind::Gemini => "model",
            _ => "assistant",
        }
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| ProviderError::UnsupportedBackend {
                name: s.to_string(),
                supported: Self::supported_list(),
            })
    }
}

/// Generation parameters shared by every family.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A configured model backend.
pub enum Backend {
    Gemini(GeminiProvider, GenerationSettings),
    OpenAi(OpenAiProvider, GenerationSettings),
    OpenAiCompatible(OpenAiProvider, GenerationSettings),
    Anthropic(AnthropicProvider, GenerationSettings),
}

impl Backend {
    /// Validate the backend identifier and credentials. Nothing touches the
    /// network here, so a bad config fails before the bot connects.
    pub fn from_config(config: &ChatConfig) -> Result<Self, ProviderError> {
        let kind: BackendKind = config.provider.parse()?;
        let settings = GenerationSettings {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let api_key = || {
            config
                .api_key
                .clone()
                .filter(|k| !k.is_empty())
                .ok_or(ProviderError::MissingCredential {
                    backend: kind.as_str(),
                    field: "chat.api_key",
                })
        };

        let backend = match kind {
            BackendKind::Gemini => Backend::Gemini(
                GeminiProvider::new(api_key()?, config.base_url.clone(), config.google_search),
                settings,
            ),
            BackendKind::OpenAi => Backend::OpenAi(
                OpenAiProvider::new(api_key()?, config.base_url.clone()),
                settings,
            ),
            BackendKind::OpenAiCompatible => {
                let base_url = config.base_url.clone().filter(|u| !u.is_empty()).ok_or(
                    ProviderError::MissingCredential {
                        backend: kind.as_str(),
                        field: "chat.base_url",
                    },
                )?;
                Backend::OpenAiCompatible(OpenAiProvider::compatible(api_key()?, base_url), settings)
            }
            BackendKind::Anthropic => Backend::Anthropic(
                AnthropicProvider::new(api_key()?, config.base_url.clone()),
                settings,
            ),
        };

        info!(backend = %kind, model = %config.model, "model backend configured");
        Ok(backend)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Gemini(..) => BackendKind::Gemini,
            Backend::OpenAi(..) => BackendKind::OpenAi,
            Backend::OpenAiCompatible(..) => BackendKind::OpenAiCompatible,
            Backend::Anthropic(..) => BackendKind::Anthropic,
        }
    }

    fn parts(&self) -> (&dyn LlmProvider, &GenerationSettings) {
        match self {
            Backend::Gemini(p, s) => (p as &dyn LlmProvider, s),
            Backend::OpenAi(p, s) | Backend::OpenAiCompatible(p, s) => (p as &dyn LlmProvider, s),
            Backend::Anthropic(p, s) => (p as &dyn LlmProvider, s),
        }
    }
}

/// History first, then the current prompt as the final user turn.
pub fn build_request(
    settings: &GenerationSettings,
    prompt: &str,
    system_prompt: &str,
    history: &[Message],
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend_from_slice(history);
    messages.push(Message::user(prompt));

    ChatRequest {
        model: settings.model.clone(),
        system: system_prompt.to_string(),
        messages,
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
    }
}

#[async_trait]
impl ChatModel for Backend {
    fn label(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn invoke(
        &self,
        prompt: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError> {
        let (provider, settings) = self.parts();
        let req = build_request(settings, prompt, system_prompt, history);
        let resp = provider.send(&req).await?;
        debug!(
            provider = provider.name(),
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            stop_reason = %resp.stop_reason,
            "model reply received"
        );
        Ok(resp.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(provider: &str) -> ChatConfig {
        ChatConfig {
            provider: provider.to_string(),
            api_key: Some("key".into()),
            ..ChatConfig::default()
        }
    }

    #[test]
    fn unsupported_backend_is_a_config_error() {
        let err = Backend::from_config(&chat("palm")).err().unwrap();
        match err {
            ProviderError::UnsupportedBackend { name, supported } => {
                assert_eq!(name, "palm");
                assert!(supported.contains("gemini"));
                assert!(supported.contains("openai_compatible"));
            }
            other => panic!("expected UnsupportedBackend, got {other:?}"),
        }
    }

    #[test]
    fn identifiers_parse_case_insensitively() {
        assert_eq!("Gemini".parse::<BackendKind>().unwrap(), BackendKind::Gemini);
        assert_eq!(
            " openai_compatible ".parse::<BackendKind>().unwrap(),
            BackendKind::OpenAiCompatible
        );
    }

    #[test]
    fn compatible_backend_requires_base_url() {
        let err = Backend::from_config(&chat("openai_compatible")).err().unwrap();
        assert!(matches!(
            err,
            ProviderError::MissingCredential { field: "chat.base_url", .. }
        ));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = ChatConfig {
            provider: "openai".into(),
            ..ChatConfig::default()
        };
        assert!(matches!(
            Backend::from_config(&config),
            Err(ProviderError::MissingCredential { field: "chat.api_key", .. })
        ));
    }

    #[test]
    fn each_family_builds() {
        for kind in BackendKind::ALL {
            let mut config = chat(kind.as_str());
            config.base_url = Some("http://localhost:8080/v1".into());
            let backend = Backend::from_config(&config).unwrap();
            assert_eq!(backend.kind(), kind);
        }
    }

    #[test]
    fn assistant_label_differs_for_gemini() {
        assert_eq!(BackendKind::Gemini.assistant_label(), "model");
        assert_eq!(BackendKind::OpenAi.assistant_label(), "assistant");
    }

    #[test]
    fn request_appends_prompt_after_history() {
        let settings = GenerationSettings {
            model: "m".into(),
            temperature: 1.0,
            max_tokens: 10,
        };
        let history = vec![Message::user("a"), Message::assistant("b")];
        let req = build_request(&settings, "kai: c", "sys", &history);
        assert_eq!(req.messages.len(), 3);
        assert_eq!(req.messages[2], Message::user("kai: c"));
        assert_eq!(req.system, "sys");
    }
}
