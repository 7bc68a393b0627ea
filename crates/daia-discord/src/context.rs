//! Long-lived services the Discord handler hands to every message run.

use std::path::PathBuf;
use std::sync::Arc;

use serenity::http::Http;
use serenity::model::id::UserId;

use daia_agent::history::NormalizeOptions;
use daia_agent::pipeline::{build_message_flow, ChatModel, Flow, FlowDeps, SharedContext, TableRenderer};
use daia_core::config::{PromptConfig, ReplyConfig};
use daia_core::settings::RuntimeSettings;

use crate::history::DiscordHistory;
use crate::send::DiscordSink;

pub struct BotContext {
    pub settings: Arc<RuntimeSettings>,
    pub model: Arc<dyn ChatModel>,
    pub renderer: Option<Arc<dyn TableRenderer>>,
    pub base_prompt: String,
    pub prompt: PromptConfig,
    pub reply: ReplyConfig,
    pub artifact_dir: PathBuf,
}

impl BotContext {
    /// Build the message flow against a connected client's REST handle.
    pub fn message_flow(&self, http: Arc<Http>, bot_id: UserId) -> Flow<SharedContext> {
        build_message_flow(FlowDeps {
            history: Arc::new(DiscordHistory::new(Arc::clone(&http), bot_id)),
            model: Arc::clone(&self.model),
            renderer: self.renderer.clone(),
            sink: Arc::new(DiscordSink::new(http)),
            settings: Arc::clone(&self.settings),
            base_prompt: self.base_prompt.clone(),
            contextual_prompt: self.prompt.contextual,
            normalize: NormalizeOptions {
                speaker_labels: self.reply.speaker_labels,
            },
            max_chars: self.reply.max_chars,
            artifact_dir: self.artifact_dir.clone(),
        })
    }
}
