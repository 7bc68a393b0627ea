use std::sync::{Arc, OnceLock};

use serenity::all::ActivityData;
use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::model::user::OnlineStatus;
use serenity::prelude::{Context, EventHandler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use daia_agent::pipeline::{Flow, PipelineError, SharedContext};
use daia_core::config::DiscordConfig;
use daia_core::types::InboundMessage;

use crate::context::BotContext;
use crate::history::display_name;

const APOLOGY: &str = "Sorry, an error occurred while processing your message.";

/// Serenity event handler that runs the message flow.
pub struct DaiaHandler {
    pub app: Arc<BotContext>,
    pub config: DiscordConfig,
    pub shutdown: CancellationToken,
    pub bot_id: OnceLock<UserId>,
    pub flow: OnceLock<Arc<Flow<SharedContext>>>,
}

impl DaiaHandler {
    pub fn new(app: Arc<BotContext>, config: DiscordConfig, shutdown: CancellationToken) -> Self {
        Self {
            app,
            config,
            shutdown,
            bot_id: OnceLock::new(),
            flow: OnceLock::new(),
        }
    }
}

#[async_trait]
impl EventHandler for DaiaHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        self.flow
            .set(Arc::new(
                self.app.message_flow(Arc::clone(&ctx.http), ready.user.id),
            ))
            .ok();

        let activity = self.app.settings.activity();
        ctx.set_presence(
            Some(ActivityData::custom(activity)),
            parse_online_status(&self.config.status),
        );

        info!(name = %ready.user.name, guilds = ready.guilds.len(), "Discord bot connected");

        crate::commands::register_commands(&ctx, self.config.command_guild_id).await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(bot_id) = self.bot_id.get().copied() else {
            return;
        };
        if msg.author.id == bot_id {
            return;
        }

        let settings = &self.app.settings;
        let respond = should_respond(
            msg.mentions_user_id(bot_id),
            msg.guild_id.is_none(),
            settings.is_channel_allowed(msg.channel_id.get()),
            settings.is_dm_allowed(msg.author.id.get()),
        );
        if !respond {
            return;
        }
        let Some(flow) = self.flow.get().map(Arc::clone) else {
            warn!("message arrived before the flow was built");
            return;
        };

        let inbound = to_inbound(&msg);
        let current_time = inbound.local_time(settings.tz());
        let http = Arc::clone(&ctx.http);
        let cancel = self.shutdown.child_token();
        let channel_id = msg.channel_id;

        tokio::spawn(async move {
            let typing = channel_id.start_typing(&http);
            let message_id = inbound.message_id;
            let mut shared = SharedContext::new(inbound, bot_id.get(), current_time);

            match flow.run(&mut shared, &cancel).await {
                Ok(outcome) => debug!(
                    message_id,
                    last_node = outcome.last_node,
                    action = %outcome.action,
                    "message flow finished"
                ),
                Err(PipelineError::Cancelled { node }) => {
                    info!(message_id, node, "message flow cancelled by shutdown");
                }
                Err(e) => {
                    error!(message_id, error = %e, "message flow failed");
                    if let Err(e) = channel_id.say(http.as_ref(), APOLOGY).await {
                        warn!(error = %e, "failed to send error notice");
                    }
                }
            }
            typing.stop();
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(
                &self.app,
                &ctx,
                &command,
                parse_online_status(&self.config.status),
            )
            .await;
        }
    }
}

/// Mentions always count; otherwise the channel must be allow-listed, or it
/// is a DM from a permitted user.
fn should_respond(mentioned: bool, is_dm: bool, channel_allowed: bool, dm_allowed: bool) -> bool {
    mentioned || channel_allowed || (is_dm && dm_allowed)
}

fn to_inbound(msg: &Message) -> InboundMessage {
    let created_at = chrono::DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
        .unwrap_or_else(chrono::Utc::now);
    let author_name = display_name(msg.author.global_name.as_deref(), &msg.author.name);

    InboundMessage {
        message_id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        guild_id: msg.guild_id.map(|g| g.get()),
        author_id: msg.author.id.get(),
        author_name,
        content: strip_mention(&msg.content).to_string(),
        created_at,
    }
}

/// Remove a leading @mention (e.g. `<@123456789>`) from a message.
fn strip_mention(s: &str) -> &str {
    let trimmed = s.trim_start();
    if trimmed.starts_with("<@") {
        if let Some(end) = trimmed.find('>') {
            return trimmed[end + 1..].trim_start();
        }
    }
    trimmed
}

/// Parse a config status string into serenity's `OnlineStatus`.
pub(crate) fn parse_online_status(s: &str) -> OnlineStatus {
    match s.to_lowercase().as_str() {
        "idle" => OnlineStatus::Idle,
        "dnd" | "do_not_disturb" => OnlineStatus::DoNotDisturb,
        "invisible" => OnlineStatus::Invisible,
        _ => OnlineStatus::Online,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_always_triggers() {
        assert!(should_respond(true, false, false, false));
    }

    #[test]
    fn allowed_channel_without_mention() {
        assert!(should_respond(false, false, true, false));
        assert!(!should_respond(false, false, false, true));
    }

    #[test]
    fn dms_follow_the_user_allow_list() {
        assert!(should_respond(false, true, false, true));
        assert!(!should_respond(false, true, false, false));
    }

    #[test]
    fn strips_leading_mention_only() {
        assert_eq!(strip_mention("<@123> hello"), "hello");
        assert_eq!(strip_mention("<@!123>hi"), "hi");
        assert_eq!(strip_mention("hi <@123>"), "hi <@123>");
    }

    #[test]
    fn status_strings() {
        assert_eq!(parse_online_status("DND"), OnlineStatus::DoNotDisturb);
        assert_eq!(parse_online_status("idle"), OnlineStatus::Idle);
        assert_eq!(parse_online_status("whatever"), OnlineStatus::Online);
    }
}
