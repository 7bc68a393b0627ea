use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Discord caps a single message at this many characters.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;
pub const DEFAULT_CONFIG_PATH: &str = "daia.toml";

/// Top-level config (daia.toml + DAIA_* env overrides).
///
/// Nested keys use a double underscore in the environment, e.g.
/// `DAIA_CHAT__API_KEY` overrides `[chat] api_key`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaiaConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Online status shown next to the bot: online, idle, dnd, invisible.
    #[serde(default = "default_status")]
    pub status: String,
    /// Register slash commands on this guild only (instant propagation).
    /// Global registration is used when unset.
    #[serde(default)]
    pub command_guild_id: Option<u64>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            status: default_status(),
            command_guild_id: None,
        }
    }
}

/// Model backend selection. `provider` is validated when the backend is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub api_key: Option<String>,
    /// Required for `openai_compatible`, optional override for the others.
    pub base_url: Option<String>,
    /// Plain text file holding the base system prompt.
    pub system_prompt_path: Option<String>,
    /// Gemini only: let the model ground answers with Google Search.
    #[serde(default)]
    pub google_search: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            base_url: None,
            system_prompt_path: None,
            google_search: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Append the participants/time block to the base system prompt.
    #[serde(default = "bool_true")]
    pub contextual: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self { contextual: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Prefix each merged user turn with "{name}: " so the model can tell
    /// speakers apart in multi-party channels.
    #[serde(default = "bool_true")]
    pub speaker_labels: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            speaker_labels: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default = "default_settings_path")]
    pub path: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory for extracted table files. Falls back to the OS temp dir.
    pub dir: Option<String>,
}

impl ArtifactsConfig {
    pub fn dir(&self) -> PathBuf {
        self.dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl DaiaConfig {
    /// Load config from a TOML file merged with `DAIA_*` environment variables.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let config: DaiaConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DAIA_").split("__"))
            .extract()
            .map_err(|e| crate::error::DaiaError::Config(e.to_string()))?;

        if config.reply.max_chars == 0 {
            return Err(crate::error::DaiaError::Config(
                "reply.max_chars must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}

fn default_status() -> String {
    "online".to_string()
}
fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_temperature() -> f32 {
    1.0
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_max_chars() -> usize {
    DISCORD_MESSAGE_LIMIT
}
fn default_settings_path() -> String {
    "config/runtime.yml".to_string()
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = DaiaConfig::load(path.to_str()).unwrap();

        assert_eq!(config.chat.provider, "gemini");
        assert_eq!(config.reply.max_chars, 2000);
        assert!(config.reply.speaker_labels);
        assert!(config.prompt.contextual);
        assert_eq!(config.settings.path, "config/runtime.yml");
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[discord]
bot_token = "abc"

[chat]
provider = "openai_compatible"
model = "llama3"
base_url = "http://localhost:11434"
api_key = "k"

[prompt]
contextual = false

[reply]
max_chars = 500
"#
        )
        .unwrap();

        let config = DaiaConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.discord.bot_token, "abc");
        assert_eq!(config.chat.provider, "openai_compatible");
        assert_eq!(config.chat.base_url.as_deref(), Some("http://localhost:11434"));
        assert!(!config.prompt.contextual);
        assert_eq!(config.reply.max_chars, 500);
        assert!((config.chat.temperature - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_reply_limit_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reply]\nmax_chars = 0").unwrap();

        let err = DaiaConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
