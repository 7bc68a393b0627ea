//! Seams between the pipeline and the outside world.
//!
//! Nodes only ever talk to these traits. The Discord crate provides the real
//! history source and sink, [`crate::Backend`] is the chat model, and tests
//! plug in in-memory fakes.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use daia_core::types::RawHistoryEntry;

use crate::provider::{Message, ProviderError};
use crate::table::TableData;

/// Channel history as the pipeline wants it.
#[derive(Debug, Clone, Default)]
pub struct FetchedHistory {
    /// Oldest first, excluding the current message, already cut at the
    /// newest `/newchat` marker.
    pub entries: Vec<RawHistoryEntry>,
    /// Placeholder key (`{message_id}_{ordinal}`) → recovered table text,
    /// read back from bot messages' table attachments.
    pub table_map: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("message or channel not found: {0}")]
    NotFound(String),

    #[error("missing permission to read history: {0}")]
    Forbidden(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl FetchError {
    /// Short explanation posted to the channel in place of a model reply.
    pub fn user_notice(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => {
                "I couldn't find that message anymore, so I can't answer it."
            }
            FetchError::Forbidden(_) => {
                "I couldn't read this channel's history, so I can't answer right now."
            }
            FetchError::Platform(_) => {
                "Discord had trouble giving me this conversation. Please try again in a moment."
            }
        }
    }
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` messages before `message_id` in `channel_id`.
    async fn fetch(
        &self,
        channel_id: u64,
        message_id: u64,
        limit: u32,
    ) -> Result<FetchedHistory, FetchError>;
}

/// A configured chat backend. Stateless across calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn label(&self) -> &'static str;

    /// Send `history` then `prompt` as the final user turn; return reply text.
    async fn invoke(
        &self,
        prompt: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
#[error("table render failed: {0}")]
pub struct RenderError(pub String);

#[async_trait]
pub trait TableRenderer: Send + Sync {
    async fn render(&self, table: &TableData) -> Result<RenderedImage, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub filename: String,
    pub data: Vec<u8>,
}

/// One platform message. `reply` asks the sink to thread it under the
/// triggering message when that is still possible.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub files: Vec<OutgoingFile>,
    pub reply: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: u64,
    pub message_id: u64,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("channel {0} is unavailable")]
    ChannelUnavailable(u64),

    #[error("send rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(
        &self,
        target: ReplyTarget,
        message: OutgoingMessage,
    ) -> Result<(), DispatchError>;
}
