use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::payloads::{
    AnswerCallbackQuerySetters, EditMessageReplyMarkupSetters, EditMessageTextSetters,
    SendMessageSetters,
};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode, User};
use teloxide::utils::html;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::alert::handler::AlertHandler;
use crate::alert::{Affordance, DisplayField, PromptDisplay, MESSAGE_FIELD};
use crate::platform::{
    Actor, ChannelId, ChatPlatform, ConfirmationSignal, IncomingMessage, PromptId,
};

const STALE_PROMPT_TEXT: &str = "This alert is no longer pending.";

/// Telegram rejects message text longer than this (UTF-16 code units).
const TELEGRAM_MAX_LEN: usize = 4096;

fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

fn render_with(display: &PromptDisplay, value: impl Fn(&DisplayField) -> String) -> String {
    let mut out = format!(
        "{} <b>{}</b>\n{}\n",
        display.accent.marker(),
        html::escape(&display.title),
        html::escape(&display.description)
    );
    for field in &display.fields {
        out.push_str(&format!(
            "\n<b>{}</b>\n{}\n",
            html::escape(&field.name),
            value(field)
        ));
    }
    out.push_str(&format!("\n<i>{}</i>", html::escape(&display.footer)));
    out
}

/// Escape `value` and cut it at a character boundary so the escaped result
/// plus an ellipsis fits in `budget`. Never splits an entity.
fn truncate_escaped(value: &str, budget: usize) -> String {
    let budget = budget.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for c in value.chars() {
        let mut buf = [0u8; 4];
        let escaped = html::escape(c.encode_utf8(&mut buf));
        let len = utf16_len(&escaped);
        if used + len > budget {
            break;
        }
        used += len;
        out.push_str(&escaped);
    }
    out.push('…');
    out
}

/// Render a prompt as Telegram HTML. An oversized message is shortened so
/// the prompt can still be posted.
fn render_html(display: &PromptDisplay) -> String {
    let full = render_with(display, |field| html::escape(&field.value));
    if utf16_len(&full) <= TELEGRAM_MAX_LEN {
        return full;
    }

    let overhead = utf16_len(&render_with(display, |field| {
        if field.name == MESSAGE_FIELD {
            String::new()
        } else {
            html::escape(&field.value)
        }
    }));
    let budget = TELEGRAM_MAX_LEN.saturating_sub(overhead);
    debug!("Prompt text too long, shortening message to {} units", budget);

    render_with(display, |field| {
        if field.name == MESSAGE_FIELD {
            truncate_escaped(&field.value, budget)
        } else {
            html::escape(&field.value)
        }
    })
}

/// One row of buttons, in attachment order.
fn keyboard(affordances: &[Affordance]) -> InlineKeyboardMarkup {
    let row = affordances
        .iter()
        .map(|a| {
            InlineKeyboardButton::callback(format!("{} {}", a.emoji(), a.label()), a.token())
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

fn actor(user: &User) -> Actor {
    Actor {
        id: user.id.0,
        name: user.full_name(),
        is_bot: user.is_bot,
    }
}

/// Convert a Telegram message into a platform-neutral one. Messages without an
/// author or without text are dropped.
fn incoming_message(msg: &Message) -> Option<IncomingMessage> {
    let user = msg.from.as_ref()?;
    let text = msg.text().or_else(|| msg.caption())?;
    Some(IncomingMessage {
        channel: ChannelId(msg.chat.id.0),
        message_id: msg.id.0,
        author: actor(user),
        text: text.to_string(),
    })
}

/// Convert a button press into a confirmation signal. Presses on unknown
/// buttons or inaccessible messages are dropped.
fn confirmation_signal(query: &CallbackQuery) -> Option<ConfirmationSignal> {
    let message = query.message.as_ref()?;
    let affordance = Affordance::from_token(query.data.as_deref()?)?;
    Some(ConfirmationSignal {
        target: PromptId {
            channel: ChannelId(message.chat().id.0),
            message_id: message.id().0,
        },
        affordance,
        actor: actor(&query.from),
    })
}

/// Chat platform backed by the Telegram Bot API. Affordances are inline
/// keyboard buttons.
pub struct TelegramPlatform {
    bot: Bot,
    // Telegram edits replace the whole keyboard, so track what is attached.
    keyboards: Mutex<HashMap<PromptId, Vec<Affordance>>>,
}

impl TelegramPlatform {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            keyboards: Mutex::new(HashMap::new()),
        }
    }

    async fn push_keyboard(&self, prompt: PromptId, affordances: Vec<Affordance>) -> Result<()> {
        let request = self
            .bot
            .edit_message_reply_markup(ChatId(prompt.channel.0), MessageId(prompt.message_id));
        let result = if affordances.is_empty() {
            request.await
        } else {
            request.reply_markup(keyboard(&affordances)).await
        };
        result.with_context(|| format!("Failed to update buttons on {:?}", prompt))?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn post_prompt(&self, channel: ChannelId, display: &PromptDisplay) -> Result<PromptId> {
        let sent = self
            .bot
            .send_message(ChatId(channel.0), render_html(display))
            .parse_mode(ParseMode::Html)
            .await
            .with_context(|| format!("Failed to send prompt to chat {}", channel.0))?;

        let prompt = PromptId {
            channel,
            message_id: sent.id.0,
        };
        self.keyboards.lock().await.insert(prompt, Vec::new());
        Ok(prompt)
    }

    async fn edit_prompt(&self, prompt: PromptId, display: &PromptDisplay) -> Result<()> {
        let attached = self
            .keyboards
            .lock()
            .await
            .get(&prompt)
            .cloned()
            .unwrap_or_default();

        let rgb = display.accent.rgb();
        debug!("Editing prompt {:?} (accent #{:06X})", prompt, rgb);

        let request = self
            .bot
            .edit_message_text(
                ChatId(prompt.channel.0),
                MessageId(prompt.message_id),
                render_html(display),
            )
            .parse_mode(ParseMode::Html);
        let result = if attached.is_empty() {
            request.await
        } else {
            request.reply_markup(keyboard(&attached)).await
        };
        result.with_context(|| format!("Failed to edit prompt {:?}", prompt))?;
        Ok(())
    }

    async fn add_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()> {
        let attached = {
            let mut keyboards = self.keyboards.lock().await;
            let attached = keyboards.entry(prompt).or_default();
            if !attached.contains(&affordance) {
                attached.push(affordance);
            }
            attached.clone()
        };
        self.push_keyboard(prompt, attached).await
    }

    async fn remove_affordance(&self, prompt: PromptId, affordance: Affordance) -> Result<()> {
        let attached = {
            let mut keyboards = self.keyboards.lock().await;
            let attached = keyboards.entry(prompt).or_default();
            attached.retain(|a| *a != affordance);
            attached.clone()
        };
        self.push_keyboard(prompt, attached).await
    }

    async fn forget(&self, prompt: PromptId) {
        self.keyboards.lock().await.remove(&prompt);
    }
}

/// Run the Telegram dispatcher until the process is stopped.
pub async fn run(bot: Bot, handler: Arc<AlertHandler>) -> Result<()> {
    info!("Starting Telegram dispatcher...");

    let tree = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, tree)
        .dependencies(dptree::deps![handler])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, handler: Arc<AlertHandler>) -> ResponseResult<()> {
    let incoming = match incoming_message(&msg) {
        Some(incoming) => incoming,
        None => return Ok(()),
    };

    // The dispatcher handles one update per chat at a time, and the button
    // press that ends this alert arrives in the same chat.
    tokio::spawn(async move {
        if let Err(e) = handler.on_message(incoming).await {
            error!("Error handling alert: {:#}", e);
        }
    });

    Ok(())
}

async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    handler: Arc<AlertHandler>,
) -> ResponseResult<()> {
    let delivered = match confirmation_signal(&query) {
        Some(signal) => handler.on_confirmation(signal),
        None => false,
    };

    let answer = bot.answer_callback_query(query.id.clone());
    if delivered {
        answer.await?;
    } else {
        answer.text(STALE_PROMPT_TEXT).await?;
    }

    Ok(())
}
