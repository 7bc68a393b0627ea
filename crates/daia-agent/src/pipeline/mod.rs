//! The per-message flow: fetch history, normalize it, build the system
//! prompt, ask the model, pull tables out of the reply, render them, send.
//!
//! [`engine`] is the generic node/graph runner; [`nodes`] holds the seven
//! stages; [`collab`] the traits they call out through.

pub mod collab;
pub mod context;
pub mod engine;
pub mod nodes;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use daia_core::settings::RuntimeSettings;

use crate::history::NormalizeOptions;
use crate::provider::ProviderError;
use crate::split::MarkupSplitter;

pub use collab::{
    ChatModel, DispatchError, FetchError, FetchedHistory, HistorySource, OutgoingFile,
    OutgoingMessage, RenderError, RenderedImage, ReplyTarget, ResponseSink, TableRenderer,
};
pub use context::{SharedContext, TableArtifact};
pub use engine::{Action, Flow, FlowBuilder, Node, NodeId, RunOutcome};

/// Errors that abort a run. Recoverable trouble (a failed history fetch, a
/// table that won't render, a rejected send) is handled inside the nodes
/// and surfaces as an [`Action`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("context slot '{0}' read before any stage wrote it")]
    MissingContext(&'static str),

    #[error("model call failed: {0}")]
    Model(#[from] ProviderError),

    #[error("artifact I/O failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("run cancelled in {node}")]
    Cancelled { node: &'static str },

    #[error("no node with id {0}")]
    UnknownNode(usize),

    #[error("run exceeded {0} steps")]
    StepLimit(usize),

    #[error("{node}: {reason}")]
    Node { node: &'static str, reason: String },
}

/// Collaborators and knobs for [`build_message_flow`].
pub struct FlowDeps {
    pub history: Arc<dyn HistorySource>,
    pub model: Arc<dyn ChatModel>,
    /// `None` skips rendering; tables still go out as `.md` attachments.
    pub renderer: Option<Arc<dyn TableRenderer>>,
    pub sink: Arc<dyn ResponseSink>,
    pub settings: Arc<RuntimeSettings>,
    pub base_prompt: String,
    pub contextual_prompt: bool,
    pub normalize: NormalizeOptions,
    pub max_chars: usize,
    pub artifact_dir: PathBuf,
}

/// Wire the message flow.
///
/// ```text
/// fetch_history   --success--> process_history --processed--> system_prompt
/// fetch_history   --failed---> send_response
/// system_prompt   --success--> llm_chat --success--> extract_tables
/// extract_tables  --tables_found--> render_tables --(images_rendered|no_images)--> send_response
/// extract_tables  --no_tables-----> send_response
/// ```
pub fn build_message_flow(deps: FlowDeps) -> Flow<SharedContext> {
    let mut b = Flow::builder();

    let fetch = b.add(nodes::FetchHistory::new(deps.history, Arc::clone(&deps.settings)));
    let process = b.add(nodes::ProcessHistory::new(deps.normalize));
    let prompt = b.add(nodes::SystemPrompt::new(
        deps.contextual_prompt,
        deps.base_prompt,
        deps.settings,
    ));
    let chat = b.add(nodes::LlmChat::new(deps.model));
    let extract = b.add(nodes::ExtractTables::new(deps.artifact_dir));
    let render = b.add(nodes::RenderTables::new(deps.renderer));
    let send = b.add(nodes::SendResponse::new(
        deps.sink,
        MarkupSplitter::new(deps.max_chars),
    ));

    b.on(fetch, Action::Success, process)
        .on(fetch, Action::Failed, send)
        .on(process, Action::Processed, prompt)
        .on(prompt, Action::Success, chat)
        .on(chat, Action::Success, extract)
        .on(extract, Action::TablesFound, render)
        .on(extract, Action::NoTables, send)
        .on(render, Action::ImagesRendered, send)
        .on(render, Action::NoImages, send);

    b.build(fetch)
}
