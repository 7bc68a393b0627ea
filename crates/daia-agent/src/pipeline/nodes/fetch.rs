use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use daia_core::settings::RuntimeSettings;

use crate::pipeline::collab::{FetchError, FetchedHistory, HistorySource};
use crate::pipeline::{Action, Node, PipelineError, SharedContext};

/// Loads recent channel history. A fetch failure is not fatal: the run
/// jumps to `send_response`, which posts a short notice instead.
pub struct FetchHistory {
    source: Arc<dyn HistorySource>,
    settings: Arc<RuntimeSettings>,
}

impl FetchHistory {
    pub fn new(source: Arc<dyn HistorySource>, settings: Arc<RuntimeSettings>) -> Self {
        Self { source, settings }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchRequest {
    pub channel_id: u64,
    pub message_id: u64,
    pub limit: u32,
}

#[async_trait]
impl Node<SharedContext> for FetchHistory {
    type Prep = FetchRequest;
    type Output = Result<FetchedHistory, FetchError>;

    fn name(&self) -> &'static str {
        "fetch_history"
    }

    fn prepare(&self, ctx: &SharedContext) -> Result<FetchRequest, PipelineError> {
        Ok(FetchRequest {
            channel_id: ctx.message.channel_id,
            message_id: ctx.message.message_id,
            limit: self.settings.history_limit(),
        })
    }

    async fn execute(&self, req: FetchRequest) -> Result<Self::Output, PipelineError> {
        Ok(self
            .source
            .fetch(req.channel_id, req.message_id, req.limit)
            .await)
    }

    fn finalize(
        &self,
        ctx: &mut SharedContext,
        output: Self::Output,
    ) -> Result<Action, PipelineError> {
        match output {
            Ok(history) => {
                info!(
                    channel_id = ctx.message.channel_id,
                    entries = history.entries.len(),
                    tables = history.table_map.len(),
                    "history fetched"
                );
                ctx.history = Some(history);
                Ok(Action::Success)
            }
            Err(e) => {
                warn!(channel_id = ctx.message.channel_id, error = %e, "history fetch failed");
                ctx.fetch_notice = Some(e.user_notice().to_string());
                Ok(Action::Failed)
            }
        }
    }
}
