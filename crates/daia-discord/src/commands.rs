//! Slash commands: `/newchat` for everyone, plus admin-only commands that
//! edit the runtime settings.
//!
//! Registration happens in `ready()`; interactions are dispatched from
//! `interaction_create` in the event handler.

use std::sync::Arc;

use serenity::all::ActivityData;
use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use serenity::model::application::{CommandDataOptionValue, CommandInteraction, CommandOptionType};
use serenity::model::channel::Channel;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::permissions::Permissions;
use serenity::model::user::OnlineStatus;
use serenity::prelude::Context;
use tracing::{info, warn};

use daia_agent::history::NEW_CHAT_MARKER;
use daia_core::settings::{ChannelMeta, UserMeta, MAX_ACTIVITY_CHARS, MAX_HISTORY_LIMIT};

use crate::context::BotContext;

fn admin(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name)
        .description(description)
        .default_member_permissions(Permissions::ADMINISTRATOR)
        .dm_permission(false)
}

fn user_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::User, "user", description).required(true)
}

/// Register slash commands, on one guild when configured, otherwise globally.
pub async fn register_commands(ctx: &Context, guild_id: Option<u64>) {
    let commands = vec![
        CreateCommand::new("newchat")
            .description("Start a fresh conversation; earlier messages are ignored"),
        admin("addchannel", "Let the bot answer every message in this channel"),
        admin("removechannel", "Stop answering un-mentioned messages in this channel"),
        admin("listchannels", "Show the channels the bot answers in"),
        admin("adduser", "Allow a user to DM the bot").add_option(user_option("User to allow")),
        admin("removeuser", "Revoke a user's DM access")
            .add_option(user_option("User to remove")),
        admin("listusers", "Show the users allowed to DM the bot"),
        admin("sethistorylimit", "Set how many earlier messages the bot reads").add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "limit", "Number of messages")
                .min_int_value(1)
                .max_int_value(u64::from(MAX_HISTORY_LIMIT))
                .required(true),
        ),
        admin("setactivity", "Set the bot's status text").add_option(
            CreateCommandOption::new(CommandOptionType::String, "activity", "Status text")
                .max_length(MAX_ACTIVITY_CHARS as u16)
                .required(true),
        ),
        admin("settimezone", "Set the timezone used for timestamps").add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "timezone",
                "IANA zone name such as Europe/Paris, or UTC",
            )
            .required(true),
        ),
        admin("refreshmetadata", "Refresh stored channel and user names"),
    ];

    match guild_id.map(GuildId::new) {
        Some(gid) => match gid.set_commands(&ctx.http, commands).await {
            Ok(cmds) => info!(guild = %gid, count = cmds.len(), "registered guild slash commands"),
            Err(e) => warn!(guild = %gid, error = %e, "failed to register guild commands"),
        },
        None => {
            match serenity::model::application::Command::set_global_commands(&ctx.http, commands)
                .await
            {
                Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }
}

/// Dispatch a slash command interaction to the appropriate handler.
pub async fn handle_interaction(
    app: &Arc<BotContext>,
    ctx: &Context,
    command: &CommandInteraction,
    status: OnlineStatus,
) {
    let name = command.data.name.as_str();
    if name == "newchat" {
        if let Err(e) = handle_newchat(ctx, command).await {
            warn!(error = %e, "failed to post new chat marker");
            respond_ephemeral(ctx, command, "Failed to send new chat marker.").await;
        }
        return;
    }

    if !is_admin(command) {
        respond_ephemeral(ctx, command, "This command needs the Administrator permission.").await;
        return;
    }

    let reply = match name {
        "addchannel" => add_channel(app, ctx, command),
        "removechannel" => remove_channel(app, command),
        "listchannels" => list_channels(app),
        "adduser" => add_user(app, command),
        "removeuser" => remove_user(app, command),
        "listusers" => list_users(app),
        "sethistorylimit" => set_history_limit(app, command),
        "setactivity" => set_activity(app, ctx, command, status),
        "settimezone" => set_timezone(app, command),
        "refreshmetadata" => refresh_metadata(app, ctx).await,
        _ => "Unknown command.".to_string(),
    };
    info!(command = name, user = %command.user.id, "admin command handled");
    respond_ephemeral(ctx, command, &reply).await;
}

/// `/newchat` posts the marker publicly so it lands in channel history.
async fn handle_newchat(ctx: &Context, command: &CommandInteraction) -> Result<(), serenity::Error> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(NEW_CHAT_MARKER),
            ),
        )
        .await
}

fn is_admin(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.administrator())
}

fn option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a CommandDataOptionValue> {
    command
        .data
        .options
        .iter()
        .find(|o| o.name == name)
        .map(|o| &o.value)
}

fn user_arg(command: &CommandInteraction) -> Option<UserId> {
    match option(command, "user") {
        Some(CommandDataOptionValue::User(id)) => Some(*id),
        _ => None,
    }
}

fn settings_failed(e: daia_core::DaiaError) -> String {
    warn!(code = e.code(), error = %e, "runtime settings update failed");
    format!("Could not save the setting: {e}")
}

fn add_channel(app: &BotContext, ctx: &Context, command: &CommandInteraction) -> String {
    let channel_name = command
        .channel
        .as_ref()
        .and_then(|c| c.name.clone())
        .unwrap_or_else(|| command.channel_id.to_string());
    let server = command
        .guild_id
        .and_then(|g| ctx.cache.guild(g).map(|guild| guild.name.clone()))
        .unwrap_or_else(|| "Unknown".to_string());
    let meta = ChannelMeta {
        server,
        channel: channel_name.clone(),
    };

    match app.settings.add_channel(command.channel_id.get(), Some(meta)) {
        Ok(true) => format!("Now answering every message in #{channel_name}."),
        Ok(false) => format!("#{channel_name} is already allowed."),
        Err(e) => settings_failed(e),
    }
}

fn remove_channel(app: &BotContext, command: &CommandInteraction) -> String {
    match app.settings.remove_channel(command.channel_id.get()) {
        Ok(true) => format!("Removed <#{}>; I'll only answer mentions here.", command.channel_id),
        Ok(false) => "This channel was not on the list.".to_string(),
        Err(e) => settings_failed(e),
    }
}

fn list_channels(app: &BotContext) -> String {
    let channels = app.settings.allowed_channels();
    if channels.is_empty() {
        return "No channels are allowed yet. Use /addchannel in one.".to_string();
    }
    let mut text = format!("**Allowed channels** ({}):\n", channels.len());
    for id in channels {
        match app.settings.channel_meta(id) {
            Some(meta) => text.push_str(&format!("- <#{id}> ({} / #{})\n", meta.server, meta.channel)),
            None => text.push_str(&format!("- <#{id}>\n")),
        }
    }
    text
}

fn add_user(app: &BotContext, command: &CommandInteraction) -> String {
    let Some(user_id) = user_arg(command) else {
        return "Please pick a user.".to_string();
    };
    let username = command
        .data
        .resolved
        .users
        .get(&user_id)
        .map(|u| u.name.clone());

    match app.settings.add_user(user_id.get(), username) {
        Ok(true) => format!("<@{user_id}> can now DM me."),
        Ok(false) => format!("<@{user_id}> was already allowed."),
        Err(e) => settings_failed(e),
    }
}

fn remove_user(app: &BotContext, command: &CommandInteraction) -> String {
    let Some(user_id) = user_arg(command) else {
        return "Please pick a user.".to_string();
    };
    match app.settings.remove_user(user_id.get()) {
        Ok(true) => format!("<@{user_id}> can no longer DM me."),
        Ok(false) => format!("<@{user_id}> was not on the list."),
        Err(e) => settings_failed(e),
    }
}

fn list_users(app: &BotContext) -> String {
    let users = app.settings.allowed_users();
    if users.is_empty() {
        return "No DM allow-list is set, so anyone can DM me.".to_string();
    }
    let mut text = format!("**Users allowed to DM** ({}):\n", users.len());
    for id in users {
        match app.settings.user_meta(id) {
            Some(meta) => text.push_str(&format!("- <@{id}> ({})\n", meta.username)),
            None => text.push_str(&format!("- <@{id}>\n")),
        }
    }
    text
}

fn set_history_limit(app: &BotContext, command: &CommandInteraction) -> String {
    let Some(limit) = option(command, "limit")
        .and_then(CommandDataOptionValue::as_i64)
        .and_then(|n| u32::try_from(n).ok())
    else {
        return format!("Please give a number between 1 and {MAX_HISTORY_LIMIT}.");
    };
    match app.settings.set_history_limit(limit) {
        Ok(()) => format!("I'll read the last {limit} messages from now on."),
        Err(e) => settings_failed(e),
    }
}

fn set_activity(
    app: &BotContext,
    ctx: &Context,
    command: &CommandInteraction,
    status: OnlineStatus,
) -> String {
    let Some(activity) = option(command, "activity").and_then(CommandDataOptionValue::as_str) else {
        return "Please give some status text.".to_string();
    };
    match app.settings.set_activity(activity) {
        Ok(()) => {
            ctx.set_presence(Some(ActivityData::custom(app.settings.activity())), status);
            format!("Status set to \"{}\".", app.settings.activity())
        }
        Err(e) => settings_failed(e),
    }
}

fn set_timezone(app: &BotContext, command: &CommandInteraction) -> String {
    let Some(tz) = option(command, "timezone").and_then(CommandDataOptionValue::as_str) else {
        return "Please give a timezone.".to_string();
    };
    match app.settings.set_timezone(tz) {
        Ok(()) => format!("Timezone set to {}.", app.settings.timezone()),
        Err(e) => format!("{e}"),
    }
}

/// Look up current names for every allowed channel and user. Lookups that
/// fail keep the stored name.
async fn refresh_metadata(app: &BotContext, ctx: &Context) -> String {
    let mut channels = Vec::new();
    for id in app.settings.allowed_channels() {
        match ChannelId::new(id).to_channel(ctx).await {
            Ok(Channel::Guild(gc)) => {
                let cached = ctx.cache.guild(gc.guild_id).map(|g| g.name.clone());
                let server = match cached {
                    Some(name) => name,
                    None => gc
                        .guild_id
                        .to_partial_guild(ctx)
                        .await
                        .map(|g| g.name)
                        .unwrap_or_else(|_| "Unknown".to_string()),
                };
                channels.push((
                    id,
                    ChannelMeta {
                        server,
                        channel: gc.name.clone(),
                    },
                ));
            }
            Ok(_) => {}
            Err(e) => warn!(channel_id = id, error = %e, "channel lookup failed"),
        }
    }

    let mut users = Vec::new();
    for id in app.settings.allowed_users() {
        match UserId::new(id).to_user(ctx).await {
            Ok(user) => users.push((id, UserMeta { username: user.name })),
            Err(e) => warn!(user_id = id, error = %e, "user lookup failed"),
        }
    }

    match app.settings.update_metadata(channels, users) {
        Ok(n) => format!("Refreshed {n} entries."),
        Err(e) => settings_failed(e),
    }
}

/// Send an ephemeral response to a slash command (only visible to the invoker).
async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) {
    let _ = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await;
}
