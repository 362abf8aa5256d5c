pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

use crate::alert::{Affordance, PromptDisplay};

/// Platform chat identifier (a Telegram group/supergroup id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub i64);

/// Identity of a message the bot posted. Channel plus message id is unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptId {
    pub channel: ChannelId,
    pub message_id: i32,
}

/// Whoever authored a message or pressed a button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: u64,
    pub name: String,
    pub is_bot: bool,
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// A message received from the platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub channel: ChannelId,
    pub message_id: i32,
    pub author: Actor,
    /// The message text (or caption) as posted
    pub text: String,
}

impl IncomingMessage {
    /// Text with control characters stripped and surrounding whitespace
    /// trimmed. Newlines and tabs are preserved.
    pub fn clean_content(&self) -> String {
        self.text
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect::<String>()
            .trim()
            .to_string()
    }
}

/// Someone invoked an affordance attached to a prompt.
#[derive(Debug, Clone)]
pub struct ConfirmationSignal {
    pub target: PromptId,
    pub affordance: Affordance,
    pub actor: Actor,
}

/// Outbound operations the alert flow needs from a chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a new prompt and return its identity.
    async fn post_prompt(&self, channel: ChannelId, display: &PromptDisplay) -> Result<PromptId>;

    /// Replace the prompt's display, keeping its affordances.
    async fn edit_prompt(&self, prompt: PromptId, display: &PromptDisplay) -> Result<()>;

    async fn add_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()>;

    async fn remove_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()>;

    /// Release anything held for a prompt once its alert is finished.
    async fn forget(&self, _prompt: PromptId) {}
}
