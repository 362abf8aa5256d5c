use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_alert_config")]
    pub alert: AlertConfig,
    pub twilio: TwilioConfig,
    #[serde(default = "default_general_config")]
    pub general: GeneralConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub token: Secret<String>,
    /// Command prefix. Kept for compatibility with older config files; the
    /// alert flow does not interpret commands.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Chat id of the group monitored for alerts.
    pub alert_channel: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertConfig {
    /// Seconds to wait for someone to confirm a prompt.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Phrase spoken before the message content.
    #[serde(default = "default_initial_message")]
    pub initial_message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: Secret<String>,
    pub numbers: Vec<String>,
    pub number_from: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Cron expression for the liveness log line.
    #[serde(default = "default_heartbeat")]
    pub heartbeat: String,
}

/// Longest confirmation window accepted, in seconds (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn default_prefix() -> String {
    "!".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_initial_message() -> String {
    "This is an urgent notification.".to_string()
}

fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}

fn default_heartbeat() -> String {
    "0 0 * * * *".to_string()
}

fn default_alert_config() -> AlertConfig {
    AlertConfig {
        timeout: default_timeout(),
        initial_message: default_initial_message(),
    }
}

fn default_general_config() -> GeneralConfig {
    GeneralConfig {
        heartbeat: default_heartbeat(),
    }
}

impl AlertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.token.expose_secret().trim().is_empty() {
            bail!("[telegram] token must not be empty");
        }
        if self.alert.timeout == 0 {
            bail!("[alert] timeout must be at least one second");
        }
        if self.alert.timeout > MAX_TIMEOUT_SECS {
            bail!(
                "[alert] timeout must be at most {} seconds, got {}",
                MAX_TIMEOUT_SECS,
                self.alert.timeout
            );
        }
        if self.twilio.account_sid.trim().is_empty() {
            bail!("[twilio] account_sid must not be empty");
        }
        if self.twilio.auth_token.expose_secret().trim().is_empty() {
            bail!("[twilio] auth_token must not be empty");
        }
        if self.twilio.number_from.trim().is_empty() {
            bail!("[twilio] number_from must not be empty");
        }
        if self.twilio.numbers.is_empty() {
            bail!("[twilio] numbers must list at least one destination");
        }
        if let Some(blank) = self.twilio.numbers.iter().position(|n| n.trim().is_empty()) {
            bail!("[twilio] numbers[{}] is empty", blank);
        }
        Ok(())
    }
}
