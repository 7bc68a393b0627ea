use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use daia_core::settings::RuntimeSettings;

use crate::pipeline::context::required;
use crate::pipeline::{Action, Node, PipelineError, SharedContext};
use crate::prompt::{compose_system_prompt, PromptContext};

pub struct SystemPrompt {
    contextual: bool,
    base: String,
    settings: Arc<RuntimeSettings>,
}

impl SystemPrompt {
    pub fn new(contextual: bool, base: String, settings: Arc<RuntimeSettings>) -> Self {
        Self {
            contextual,
            base,
            settings,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptInput {
    pub participants: BTreeSet<String>,
    pub current_user: String,
    pub current_time: String,
    pub history_limit: u32,
}

#[async_trait]
impl Node<SharedContext> for SystemPrompt {
    type Prep = PromptInput;
    type Output = String;

    fn name(&self) -> &'static str {
        "system_prompt"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<PromptInput, PipelineError> {
        let normalized = required(&ctx.normalized, "normalized")?;
        Ok(PromptInput {
            participants: normalized.participants.clone(),
            current_user: ctx.message.author_name.clone(),
            current_time: ctx.current_time.clone(),
            history_limit: self.settings.history_limit(),
        })
    }

    async fn execute(&self, input: PromptInput) -> Result<String, PipelineError> {
        let pctx = PromptContext {
            participants: &input.participants,
            current_user: &input.current_user,
            current_time: &input.current_time,
            history_limit: input.history_limit,
        };
        Ok(compose_system_prompt(self.contextual, &self.base, &pctx))
    }

    fn finalize(&self, ctx: &mut SharedContext, prompt: String) -> Result<Action, PipelineError> {
        ctx.system_prompt = Some(prompt);
        Ok(Action::Success)
    }
}
