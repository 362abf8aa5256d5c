mod alert;
mod config;
mod heartbeat;
mod platform;
mod telephony;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::alert::handler::AlertHandler;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramPlatform};
use crate::heartbeat::Heartbeat;
use crate::telephony::twilio::TwilioClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,alert_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Alert channel: {}", config.telegram.alert_channel);
    info!("  Command prefix: {}", config.telegram.prefix);
    info!("  Confirmation timeout: {}s", config.alert.timeout);
    info!("  Destinations: {}", config.twilio.numbers.len());

    let bot = Bot::new(config.telegram.token.expose_secret());

    // Fail at startup, not on the first alert
    let me = bot
        .get_me()
        .await
        .context("Failed to authenticate with Telegram; check [telegram] token")?;
    let channel = bot
        .get_chat(ChatId(config.telegram.alert_channel))
        .await
        .with_context(|| {
            format!(
                "Failed to resolve alert channel {}; is the bot a member?",
                config.telegram.alert_channel
            )
        })?;
    info!(
        "Authenticated as @{}, watching {}",
        me.username(),
        channel.title().unwrap_or("untitled chat")
    );

    let platform = Arc::new(TelegramPlatform::new(bot.clone()));
    let telephony = Arc::new(TwilioClient::new(&config.twilio));
    let handler = Arc::new(AlertHandler::new(&config, platform, telephony));

    let heartbeat =
        Heartbeat::start(&config.general.heartbeat, handler.confirmations().clone()).await?;

    info!("Bot is starting...");
    telegram::run(bot, handler).await?;

    info!("Dispatcher stopped after {} heartbeat(s)", heartbeat.beats());

    Ok(())
}
