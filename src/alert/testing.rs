//! In-memory stand-ins for the chat and telephony collaborators.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::alert::{Affordance, PromptDisplay};
use crate::config::Config;
use crate::platform::{Actor, ChannelId, ChatPlatform, IncomingMessage, PromptId};
use crate::telephony::Telephony;

pub const ALERT_CHANNEL: ChannelId = ChannelId(-1001);

pub fn human_actor(id: u64, name: &str) -> Actor {
    Actor {
        id,
        name: name.to_string(),
        is_bot: false,
    }
}

pub fn bot_actor(id: u64) -> Actor {
    Actor {
        id,
        name: "relay_bot".to_string(),
        is_bot: true,
    }
}

pub fn prompt_id(message_id: i32) -> PromptId {
    PromptId {
        channel: ALERT_CHANNEL,
        message_id,
    }
}

pub fn human_message(text: &str) -> IncomingMessage {
    IncomingMessage {
        channel: ALERT_CHANNEL,
        message_id: 1,
        author: human_actor(1, "Ada"),
        text: text.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Post(ChannelId, PromptDisplay),
    Edit(PromptId, PromptDisplay),
    Add(PromptId, Affordance),
    Remove(PromptId, Affordance),
    Forget(PromptId),
}

/// Records every platform call. Each `add_affordance` is also announced on a
/// channel so tests can act once a prompt is ready.
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    next_id: Mutex<i32>,
    ready: mpsc::UnboundedSender<PromptId>,
    fail_edits: bool,
}

impl RecordingPlatform {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptId>) {
        let (ready, rx) = mpsc::unbounded_channel();
        let platform = Self {
            calls: Mutex::new(Vec::new()),
            next_id: Mutex::new(100),
            ready,
            fail_edits: false,
        };
        (platform, rx)
    }

    pub fn failing_edits() -> (Self, mpsc::UnboundedReceiver<PromptId>) {
        let (mut platform, rx) = Self::new();
        platform.fail_edits = true;
        (platform, rx)
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PlatformCall::Post(..)))
            .count()
    }

    pub fn edits(&self) -> Vec<PromptDisplay> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Edit(_, display) => Some(display),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn post_prompt(&self, channel: ChannelId, display: &PromptDisplay) -> Result<PromptId> {
        self.record(PlatformCall::Post(channel, display.clone()));
        let mut next = self.next_id.lock().unwrap();
        let prompt = PromptId {
            channel,
            message_id: *next,
        };
        *next += 1;
        Ok(prompt)
    }

    async fn edit_prompt(&self, prompt: PromptId, display: &PromptDisplay) -> Result<()> {
        if self.fail_edits {
            bail!("message to edit not found");
        }
        self.record(PlatformCall::Edit(prompt, display.clone()));
        Ok(())
    }

    async fn add_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()> {
        self.record(PlatformCall::Add(prompt, affordance));
        let _ = self.ready.send(prompt);
        Ok(())
    }

    async fn remove_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()> {
        self.record(PlatformCall::Remove(prompt, affordance));
        Ok(())
    }

    async fn forget(&self, prompt: PromptId) {
        self.record(PlatformCall::Forget(prompt));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedCall {
    pub to: String,
    pub from: String,
    pub spoken: String,
}

/// Records call attempts; numbers in `fail` return an error.
#[derive(Default)]
pub struct RecordingTelephony {
    calls: Mutex<Vec<PlacedCall>>,
    fail: HashSet<String>,
}

impl RecordingTelephony {
    pub fn failing(numbers: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: numbers.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<PlacedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Telephony for RecordingTelephony {
    async fn place_call(&self, to: &str, from: &str, spoken: &str) -> Result<String> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(PlacedCall {
            to: to.to_string(),
            from: from.to_string(),
            spoken: spoken.to_string(),
        });
        if self.fail.contains(to) {
            bail!("Twilio API error (400 Bad Request): invalid To number");
        }
        Ok(format!("CA{}", calls.len() - 1))
    }
}

pub fn test_config() -> Config {
    Config::parse(
        r#"
[telegram]
token = "123:abc"
alert_channel = -1001

[alert]
timeout = 60
initial_message = "Emergency alert."

[twilio]
account_sid = "AC123"
auth_token = "secret"
numbers = ["+15550001111", "+15550002222"]
number_from = "+15559990000"
"#,
    )
    .unwrap()
}
