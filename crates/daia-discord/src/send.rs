//! Delivering planned reply messages to Discord.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateAllowedMentions, CreateAttachment, CreateMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use tracing::warn;

use daia_agent::pipeline::{DispatchError, OutgoingMessage, ReplyTarget, ResponseSink};

use crate::error::http_status;

pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn build(message: &OutgoingMessage) -> CreateMessage {
    let mut builder = CreateMessage::new()
        .allowed_mentions(CreateAllowedMentions::new().replied_user(false))
        .add_files(
            message
                .files
                .iter()
                .map(|f| CreateAttachment::bytes(f.data.clone(), f.filename.clone())),
        );
    if let Some(content) = &message.content {
        builder = builder.content(content);
    }
    builder
}

#[async_trait]
impl ResponseSink for DiscordSink {
    /// A reply whose reference is rejected (the original message was
    /// deleted, say) is retried once as a plain channel message.
    async fn deliver(
        &self,
        target: ReplyTarget,
        message: OutgoingMessage,
    ) -> Result<(), DispatchError> {
        let channel = ChannelId::new(target.channel_id);

        if message.reply {
            let reference = (channel, MessageId::new(target.message_id));
            match channel
                .send_message(self.http.as_ref(), build(&message).reference_message(reference))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => warn!(
                    channel_id = target.channel_id,
                    error = %e,
                    "reply failed, sending without reference"
                ),
            }
        }

        channel
            .send_message(self.http.as_ref(), build(&message))
            .await
            .map(|_| ())
            .map_err(|e| match http_status(&e) {
                Some(404) | Some(403) => DispatchError::ChannelUnavailable(target.channel_id),
                _ => DispatchError::Rejected(e.to_string()),
            })
    }
}
