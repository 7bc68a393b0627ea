use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::pipeline::collab::ChatModel;
use crate::pipeline::context::required;
use crate::pipeline::{Action, Node, PipelineError, SharedContext};
use crate::provider::Message;

/// Calls the model. A provider error aborts the run.
pub struct LlmChat {
    model: Arc<dyn ChatModel>,
}

impl LlmChat {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[derive(Debug, Clone)]
pub struct ChatInput {
    pub prompt: String,
    pub system_prompt: String,
    pub history: Vec<Message>,
}

#[async_trait]
impl Node<SharedContext> for LlmChat {
    type Prep = ChatInput;
    type Output = String;

    fn name(&self) -> &'static str {
        "llm_chat"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<ChatInput, PipelineError> {
        let system_prompt = required(&ctx.system_prompt, "system_prompt")?;
        let normalized = required(&ctx.normalized, "normalized")?;
        Ok(ChatInput {
            prompt: format!("{}: {}", ctx.message.author_name, ctx.message.content),
            system_prompt: system_prompt.clone(),
            history: normalized.turns.clone(),
        })
    }

    async fn execute(&self, input: ChatInput) -> Result<String, PipelineError> {
        let started = Instant::now();
        let reply = self
            .model
            .invoke(&input.prompt, &input.system_prompt, &input.history)
            .await?;
        info!(
            backend = self.model.label(),
            history_turns = input.history.len(),
            reply_chars = reply.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model replied"
        );
        Ok(reply)
    }

    fn finalize(&self, ctx: &mut SharedContext, reply: String) -> Result<Action, PipelineError> {
        ctx.reply = Some(reply);
        Ok(Action::Success)
    }
}
