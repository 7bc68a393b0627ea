//! The seven stages of the message flow.

mod chat;
mod extract;
mod fetch;
mod process;
mod prompt;
mod render;
mod send;

pub use chat::{ChatInput, LlmChat};
pub use extract::{ExtractInput, ExtractTables, Extracted};
pub use fetch::{FetchHistory, FetchRequest};
pub use process::{ProcessHistory, ProcessInput};
pub use prompt::{PromptInput, SystemPrompt};
pub use render::{RenderTables, RenderedTable};
pub use send::{plan_dispatch, SendPlan, SendResponse};
