use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The chat message that triggered a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn is_dm(&self) -> bool {
        self.guild_id.is_none()
    }

    /// Creation time rendered in the operator's timezone, e.g.
    /// `2025-03-01 14:05:09 JST (+09:00)`.
    pub fn local_time(&self, tz: Tz) -> String {
        self.created_at
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S %Z (%:z)")
            .to_string()
    }
}

/// Who wrote a history entry. Absent when the bot wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: u64,
    pub display_name: String,
}

/// A file attached to a historical message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub url: String,
    pub size: u64,
}

/// One message from channel history, as fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHistoryEntry {
    pub id: u64,
    pub author: Option<Author>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl RawHistoryEntry {
    pub fn from_user(id: u64, author_id: u64, name: &str, content: &str) -> Self {
        Self {
            id,
            author: Some(Author {
                id: author_id,
                display_name: name.to_string(),
            }),
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn from_bot(id: u64, content: &str) -> Self {
        Self {
            id,
            author: None,
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.author.is_none()
    }
}
