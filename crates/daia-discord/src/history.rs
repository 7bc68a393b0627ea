//! Channel history over the Discord REST API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, MessageId, UserId};
use tracing::{debug, warn};

use daia_agent::history::truncate_at_marker;
use daia_agent::pipeline::{FetchError, FetchedHistory, HistorySource};
use daia_agent::table::PlaceholderKey;
use daia_core::settings::MAX_HISTORY_LIMIT;
use daia_core::types::{AttachmentRef, Author, RawHistoryEntry};

use crate::error::http_status;

pub struct DiscordHistory {
    http: Arc<Http>,
    bot_id: UserId,
    downloads: reqwest::Client,
}

impl DiscordHistory {
    pub fn new(http: Arc<Http>, bot_id: UserId) -> Self {
        Self {
            http,
            bot_id,
            downloads: reqwest::Client::new(),
        }
    }

    /// Download every table attachment on the retained messages at once.
    async fn recover_tables(&self, entries: &[RawHistoryEntry]) -> HashMap<String, String> {
        let jobs = table_attachments(entries).into_iter().map(|(key, url)| async move {
            let result = self.download(&url).await;
            (key, result)
        });

        let mut map = HashMap::new();
        for (key, result) in join_all(jobs).await {
            match result {
                Ok(text) => {
                    map.insert(key.to_string(), text);
                }
                Err(e) => warn!(key = %key, error = %e, "table attachment download failed"),
            }
        }
        map
    }

    async fn download(&self, url: &str) -> Result<String, reqwest::Error> {
        self.downloads
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl HistorySource for DiscordHistory {
    async fn fetch(
        &self,
        channel_id: u64,
        message_id: u64,
        limit: u32,
    ) -> Result<FetchedHistory, FetchError> {
        let channel = ChannelId::new(channel_id);
        let target = channel
            .message(self.http.as_ref(), MessageId::new(message_id))
            .await
            .map_err(classify)?;

        let limit = limit.clamp(1, MAX_HISTORY_LIMIT) as u8;
        let newest_first = channel
            .messages(
                self.http.as_ref(),
                GetMessages::new().before(target.id).limit(limit),
            )
            .await
            .map_err(classify)?;

        let fetched = newest_first.len();
        let entries = truncate_at_marker(
            newest_first
                .iter()
                .map(|m| to_entry(m, self.bot_id))
                .collect(),
        );
        let table_map = self.recover_tables(&entries).await;
        debug!(channel_id, fetched, kept = entries.len(), "channel history loaded");

        Ok(FetchedHistory { entries, table_map })
    }
}

fn classify(err: serenity::Error) -> FetchError {
    match http_status(&err) {
        Some(404) => FetchError::NotFound(err.to_string()),
        Some(403) => FetchError::Forbidden(err.to_string()),
        _ => FetchError::Platform(err.to_string()),
    }
}

fn to_entry(msg: &Message, bot_id: UserId) -> RawHistoryEntry {
    let author = (msg.author.id != bot_id).then(|| Author {
        id: msg.author.id.get(),
        display_name: display_name(msg.author.global_name.as_deref(), &msg.author.name),
    });
    RawHistoryEntry {
        id: msg.id.get(),
        author,
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| AttachmentRef {
                filename: a.filename.clone(),
                url: a.url.clone(),
                size: u64::from(a.size),
            })
            .collect(),
    }
}

/// The label a user carries in prompts: global display name, else username.
/// Server nicknames are not used because fetched history does not carry them.
pub(crate) fn display_name(global_name: Option<&str>, username: &str) -> String {
    global_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(username)
        .to_string()
}

/// Attachments whose filename marks them as a stored table, with their URLs.
fn table_attachments(entries: &[RawHistoryEntry]) -> Vec<(PlaceholderKey, String)> {
    entries
        .iter()
        .flat_map(|e| e.attachments.iter())
        .filter_map(|a| {
            PlaceholderKey::from_attachment_name(&a.filename).map(|key| (key, a.url.clone()))
        })
        .collect()
}
