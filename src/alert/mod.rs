pub mod confirm;
pub mod handler;

#[cfg(test)]
pub(crate) mod testing;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::platform::{IncomingMessage, PromptId};

/// Name of the prompt field that carries the alert text.
pub const MESSAGE_FIELD: &str = "Message";

/// Where an alert is in its lifecycle. Drives the prompt display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Pending,
    Dispatched,
    TimedOut,
}

impl AlertStatus {
    pub fn label(self) -> &'static str {
        match self {
            AlertStatus::Pending => "Pending",
            AlertStatus::Dispatched => "Dispatched",
            AlertStatus::TimedOut => "Timed out",
        }
    }

    pub fn accent(self) -> Accent {
        match self {
            AlertStatus::Pending => Accent::Alert,
            AlertStatus::Dispatched => Accent::Success,
            AlertStatus::TimedOut => Accent::Neutral,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AlertStatus::Pending)
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Status color of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Alert,
    Success,
    Neutral,
}

impl Accent {
    pub fn rgb(self) -> u32 {
        match self {
            Accent::Alert => 0xFF0000,
            Accent::Success => 0x88FF00,
            Accent::Neutral => 0x000000,
        }
    }

    /// Marker for platforms without colored message frames.
    pub fn marker(self) -> &'static str {
        match self {
            Accent::Alert => "🔴",
            Accent::Success => "🟢",
            Accent::Neutral => "⚫",
        }
    }
}

/// An interactive control attached to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affordance {
    Confirm,
    Expired,
}

impl Affordance {
    pub fn emoji(self) -> &'static str {
        match self {
            Affordance::Confirm => "📱",
            Affordance::Expired => "❌",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Affordance::Confirm => "Dispatch call",
            Affordance::Expired => "Expired",
        }
    }

    /// Wire token carried by the platform control.
    pub fn token(self) -> &'static str {
        match self {
            Affordance::Confirm => "alert:confirm",
            Affordance::Expired => "alert:expired",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "alert:confirm" => Some(Affordance::Confirm),
            "alert:expired" => Some(Affordance::Expired),
            _ => None,
        }
    }
}

/// A named block of prompt content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayField {
    pub name: String,
    pub value: String,
}

/// Platform-neutral payload of a prompt. Field values are plain text; the
/// platform adapter is responsible for escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDisplay {
    pub title: String,
    pub description: String,
    pub accent: Accent,
    pub fields: Vec<DisplayField>,
    pub footer: String,
}

/// One message's journey from posting through confirmation or expiry.
#[derive(Debug)]
pub struct AlertRequest {
    pub id: Uuid,
    pub original: IncomingMessage,
    pub prompt: Option<PromptId>,
    pub requested_at: DateTime<Utc>,
    status: AlertStatus,
}

impl AlertRequest {
    pub fn new(original: IncomingMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            original,
            prompt: None,
            requested_at: Utc::now(),
            status: AlertStatus::Pending,
        }
    }

    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// Move out of `Pending`. Only one terminal transition is allowed.
    pub fn resolve(&mut self, outcome: AlertStatus) -> Result<()> {
        if !outcome.is_terminal() {
            bail!("alert {} cannot move back to {}", self.id, outcome);
        }
        if self.status.is_terminal() {
            bail!(
                "alert {} already resolved as {}, refusing {}",
                self.id,
                self.status,
                outcome
            );
        }
        self.status = outcome;
        Ok(())
    }

    /// Build the prompt payload for the current status.
    pub fn display(&self) -> PromptDisplay {
        let mut fields = vec![DisplayField {
            name: MESSAGE_FIELD.to_string(),
            value: self.original.clean_content(),
        }];

        if self.status == AlertStatus::Pending {
            fields.push(DisplayField {
                name: "Actions".to_string(),
                value: format!(
                    "Please press {} {} to dispatch a notification.",
                    Affordance::Confirm.emoji(),
                    Affordance::Confirm.label()
                ),
            });
        }

        PromptDisplay {
            title: format!("Urgent Notification ({})", self.status),
            description: format!(
                "Your alert has been set to {}.",
                self.status.label().to_lowercase()
            ),
            accent: self.status.accent(),
            fields,
            footer: format!(
                "Requested by {} at {}",
                self.original.author.name,
                self.requested_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}
