use std::sync::Arc;
use std::time::Duration;

use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use daia_core::config::DiscordConfig;

use crate::context::BotContext;
use crate::error::DiscordError;
use crate::handler::DaiaHandler;

/// Discord gateway adapter.
///
/// Wraps a serenity `Client` and reconnects whenever the gateway drops,
/// until `shutdown` is cancelled.
pub struct DiscordAdapter {
    app: Arc<BotContext>,
    config: DiscordConfig,
    shutdown: CancellationToken,
}

impl DiscordAdapter {
    pub fn new(config: &DiscordConfig, app: Arc<BotContext>, shutdown: CancellationToken) -> Self {
        Self {
            app,
            config: config.clone(),
            shutdown,
        }
    }

    /// Connect and keep reconnecting until shutdown. Runs in-flight message
    /// tasks down through the child tokens handed to each run.
    pub async fn run(self) -> Result<(), DiscordError> {
        if self.config.bot_token.trim().is_empty() {
            return Err(DiscordError::NoToken);
        }

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        loop {
            let Some(mut client) = self.connect(intents).await else {
                break;
            };
            let shards = Arc::clone(&client.shard_manager);

            info!("Discord: gateway connecting");
            tokio::select! {
                result = client.start() => match result {
                    Err(e) => warn!("Discord: gateway error ({e}), reconnecting in 5s"),
                    Ok(()) => info!("Discord: gateway stopped cleanly, reconnecting in 5s"),
                },
                _ = self.shutdown.cancelled() => {
                    info!("Discord: shutting down gateway");
                    shards.shutdown_all().await;
                    break;
                }
            }

            if self.pause(Duration::from_secs(5)).await {
                break;
            }
        }

        info!("Discord: adapter stopped");
        Ok(())
    }

    /// Build a client, retrying every 30s. `None` once shutdown is requested.
    async fn connect(&self, intents: GatewayIntents) -> Option<Client> {
        loop {
            match self.build_client(intents).await {
                Ok(c) => return Some(c),
                Err(e) => {
                    error!("Discord: connect failed ({e}), retrying in 30s");
                    if self.pause(Duration::from_secs(30)).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep unless shutdown comes first; returns `true` on shutdown.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = self.shutdown.cancelled() => true,
        }
    }

    /// Build a fresh serenity `Client` with our event handler.
    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, serenity::Error> {
        let handler = DaiaHandler::new(
            Arc::clone(&self.app),
            self.config.clone(),
            self.shutdown.clone(),
        );

        Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await
    }
}
