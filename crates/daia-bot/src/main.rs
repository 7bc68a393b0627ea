use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use daia_agent::prompt::load_base_prompt;
use daia_agent::Backend;
use daia_core::config::DaiaConfig;
use daia_core::settings::RuntimeSettings;
use daia_discord::{BotContext, DiscordAdapter};

#[derive(Debug, Parser)]
#[command(name = "daia-bot", version, about = "Discord chat bot backed by a configurable language model")]
struct Cli {
    /// Path to the TOML config file. Defaults to ./daia.toml.
    #[arg(short, long, env = "DAIA_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "daia_bot=info,daia_agent=info,daia_discord=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = DaiaConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let settings = RuntimeSettings::load(&config.settings.path)
        .with_context(|| format!("loading runtime settings from {}", config.settings.path))?;
    info!(
        path = %config.settings.path,
        channels = settings.allowed_channels().len(),
        users = settings.allowed_users().len(),
        history_limit = settings.history_limit(),
        timezone = %settings.timezone(),
        "runtime settings loaded"
    );

    // Fail before connecting if the backend is misconfigured.
    let backend = Backend::from_config(&config.chat).context("configuring chat backend")?;
    info!(
        backend = %backend.kind(),
        model = %config.chat.model,
        temperature = config.chat.temperature,
        contextual_prompt = config.prompt.contextual,
        "chat backend ready"
    );

    let app = Arc::new(BotContext {
        settings: Arc::new(settings),
        model: Arc::new(backend),
        renderer: None,
        base_prompt: load_base_prompt(config.chat.system_prompt_path.as_deref()),
        prompt: config.prompt.clone(),
        reply: config.reply.clone(),
        artifact_dir: config.artifacts.dir(),
    });

    let shutdown = CancellationToken::new();
    let adapter = DiscordAdapter::new(&config.discord, app, shutdown.clone());
    let mut bot = tokio::spawn(adapter.run());

    tokio::select! {
        result = &mut bot => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            shutdown.cancel();
            bot.await??;
        }
    }

    info!("daia-bot stopped");
    Ok(())
}
