pub mod anthropic;
pub mod backend;
pub mod gemini;
pub mod history;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod split;
pub mod table;

pub use backend::{Backend, BackendKind};
pub use pipeline::{build_message_flow, Flow, FlowDeps, SharedContext};
