//! Per-message state threaded through the flow.

use std::path::PathBuf;

use tempfile::TempPath;

use daia_core::types::InboundMessage;

use crate::history::NormalizedHistory;
use crate::table::{PlaceholderKey, TableExtraction};

use super::collab::{FetchedHistory, RenderedImage};
use super::PipelineError;

/// A table's original markdown, written to disk so it can travel as an
/// attachment. The file is removed when this value is closed or dropped.
#[derive(Debug)]
pub struct TableArtifact {
    pub key: PlaceholderKey,
    pub attachment_name: String,
    pub path: TempPath,
}

impl TableArtifact {
    pub fn file_path(&self) -> PathBuf {
        self.path.to_path_buf()
    }
}

/// Everything one run knows. Each stage fills in its own slot; later stages
/// read earlier slots through [`required`].
#[derive(Debug)]
pub struct SharedContext {
    pub message: InboundMessage,
    pub bot_user_id: u64,
    /// The message timestamp rendered in the configured timezone.
    pub current_time: String,

    pub history: Option<FetchedHistory>,
    /// Set instead of `history` when the fetch failed.
    pub fetch_notice: Option<String>,
    pub normalized: Option<NormalizedHistory>,
    pub system_prompt: Option<String>,
    pub reply: Option<String>,
    pub extraction: Option<TableExtraction>,
    pub artifacts: Vec<TableArtifact>,
    pub images: Vec<RenderedImage>,
    pub delivered: Option<bool>,
}

impl SharedContext {
    pub fn new(message: InboundMessage, bot_user_id: u64, current_time: String) -> Self {
        Self {
            message,
            bot_user_id,
            current_time,
            history: None,
            fetch_notice: None,
            normalized: None,
            system_prompt: None,
            reply: None,
            extraction: None,
            artifacts: Vec::new(),
            images: Vec::new(),
            delivered: None,
        }
    }

    /// Text the send stage should post, in priority order: table-stripped
    /// reply, raw reply, fetch failure notice, fallback.
    pub fn outgoing_text(&self) -> String {
        if let Some(ex) = &self.extraction {
            return ex.text.clone();
        }
        if let Some(reply) = &self.reply {
            return reply.clone();
        }
        if let Some(notice) = &self.fetch_notice {
            return notice.clone();
        }
        "No response generated".to_string()
    }
}

/// Borrow a slot an earlier stage should have written.
pub fn required<'a, T>(slot: &'a Option<T>, key: &'static str) -> Result<&'a T, PipelineError> {
    slot.as_ref().ok_or(PipelineError::MissingContext(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ctx() -> SharedContext {
        let msg = InboundMessage {
            message_id: 10,
            channel_id: 20,
            guild_id: Some(30),
            author_id: 40,
            author_name: "ana".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        SharedContext::new(msg, 1, "now".into())
    }

    #[test]
    fn outgoing_text_priority() {
        let mut c = ctx();
        assert_eq!(c.outgoing_text(), "No response generated");

        c.fetch_notice = Some("notice".into());
        assert_eq!(c.outgoing_text(), "notice");

        c.reply = Some("reply".into());
        assert_eq!(c.outgoing_text(), "reply");

        c.extraction = Some(TableExtraction {
            text: "stripped".into(),
            tables: Vec::new(),
        });
        assert_eq!(c.outgoing_text(), "stripped");
    }

    #[test]
    fn required_reports_missing_key() {
        let c = ctx();
        let err = required(&c.reply, "reply").unwrap_err();
        assert!(matches!(err, PipelineError::MissingContext("reply")));
    }
}
