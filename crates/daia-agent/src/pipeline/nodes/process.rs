use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use daia_core::types::RawHistoryEntry;

use crate::history::{normalize_history, NormalizeOptions, NormalizedHistory};
use crate::pipeline::context::required;
use crate::pipeline::{Action, Node, PipelineError, SharedContext};

pub struct ProcessHistory {
    options: NormalizeOptions,
}

impl ProcessHistory {
    pub fn new(options: NormalizeOptions) -> Self {
        Self { options }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessInput {
    pub entries: Vec<RawHistoryEntry>,
    pub table_map: HashMap<String, String>,
    pub bot_user_id: u64,
}

#[async_trait]
impl Node<SharedContext> for ProcessHistory {
    type Prep = ProcessInput;
    type Output = NormalizedHistory;

    fn name(&self) -> &'static str {
        "process_history"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<ProcessInput, PipelineError> {
        let history = required(&ctx.history, "history")?;
        Ok(ProcessInput {
            entries: history.entries.clone(),
            table_map: history.table_map.clone(),
            bot_user_id: ctx.bot_user_id,
        })
    }

    async fn execute(&self, input: ProcessInput) -> Result<NormalizedHistory, PipelineError> {
        Ok(normalize_history(
            &input.entries,
            input.bot_user_id,
            &input.table_map,
            self.options,
        ))
    }

    fn finalize(
        &self,
        ctx: &mut SharedContext,
        normalized: NormalizedHistory,
    ) -> Result<Action, PipelineError> {
        debug!(
            turns = normalized.turns.len(),
            participants = normalized.participants.len(),
            "history normalized"
        );
        ctx.normalized = Some(normalized);
        Ok(Action::Processed)
    }
}
