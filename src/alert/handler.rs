use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, info_span, Instrument};

use crate::alert::confirm::{Confirmation, ConfirmationHub};
use crate::alert::{Affordance, AlertRequest, AlertStatus};
use crate::config::Config;
use crate::platform::{ChannelId, ChatPlatform, ConfirmationSignal, IncomingMessage};
use crate::telephony::{CallDispatcher, Telephony};

/// Turns messages in the alert channel into confirmed phone calls.
pub struct AlertHandler {
    alert_channel: ChannelId,
    timeout: Duration,
    platform: Arc<dyn ChatPlatform>,
    calls: CallDispatcher,
    confirmations: ConfirmationHub,
}

impl AlertHandler {
    pub fn new(
        config: &Config,
        platform: Arc<dyn ChatPlatform>,
        telephony: Arc<dyn Telephony>,
    ) -> Self {
        Self {
            alert_channel: ChannelId(config.telegram.alert_channel),
            timeout: config.alert.timeout(),
            platform,
            calls: CallDispatcher::new(telephony, &config.twilio, &config.alert),
            confirmations: ConfirmationHub::new(),
        }
    }

    pub fn confirmations(&self) -> &ConfirmationHub {
        &self.confirmations
    }

    /// Whether a message should start an alert.
    pub fn accepts(&self, msg: &IncomingMessage) -> bool {
        !msg.author.is_bot && msg.channel == self.alert_channel && !msg.clean_content().is_empty()
    }

    /// Route a confirmation signal to the prompt it targets.
    pub fn on_confirmation(&self, signal: ConfirmationSignal) -> bool {
        self.confirmations.publish(signal)
    }

    /// Run one alert from prompt to terminal status. Returns `None` when the
    /// message is not an alert.
    pub async fn on_message(&self, msg: IncomingMessage) -> Result<Option<AlertStatus>> {
        if !self.accepts(&msg) {
            debug!(
                "Ignoring message {} in {:?} from {}",
                msg.message_id, msg.channel, msg.author
            );
            return Ok(None);
        }

        let mut request = AlertRequest::new(msg);
        let alert_id = request.id;
        let span = info_span!("alert", alert_id = %alert_id);

        let result = self.process(&mut request).instrument(span).await;
        if let Some(prompt) = request.prompt {
            self.platform.forget(prompt).await;
        }
        result.with_context(|| {
            format!(
                "Alert {} failed in status {} (prompt {:?})",
                alert_id,
                request.status(),
                request.prompt
            )
        })?;

        Ok(Some(request.status()))
    }

    async fn process(&self, request: &mut AlertRequest) -> Result<()> {
        let prompt = self
            .platform
            .post_prompt(request.original.channel, &request.display())
            .await
            .context("Failed to post prompt")?;
        request.prompt = Some(prompt);

        // Listen before the button exists so no press can be missed.
        let pending = self.confirmations.register(prompt);
        self.platform
            .add_affordance(prompt, Affordance::Confirm)
            .await
            .context("Failed to attach confirm button")?;
        info!(
            "Pending message has been created by {}",
            request.original.author
        );

        match pending.wait(self.timeout).await {
            Confirmation::TimedOut => {
                request.resolve(AlertStatus::TimedOut)?;
                self.platform
                    .edit_prompt(prompt, &request.display())
                    .await
                    .context("Failed to mark prompt as timed out")?;
                self.platform
                    .remove_affordance(prompt, Affordance::Confirm)
                    .await
                    .context("Failed to remove confirm button")?;
                self.platform
                    .add_affordance(prompt, Affordance::Expired)
                    .await
                    .context("Failed to attach expired marker")?;
                info!(
                    "Pending message from {} timed out after {}s",
                    request.original.author,
                    self.timeout.as_secs()
                );
            }
            Confirmation::Confirmed(actor) => {
                request.resolve(AlertStatus::Dispatched)?;
                self.platform
                    .edit_prompt(prompt, &request.display())
                    .await
                    .context("Failed to mark prompt as dispatched")?;
                info!("Pending message has been dispatched by {}", actor);
                self.calls
                    .dispatch(&request.original)
                    .await
                    .context("Failed to place calls")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::{
        bot_actor, human_actor, human_message, prompt_id, test_config, PlatformCall,
        RecordingPlatform, RecordingTelephony, ALERT_CHANNEL,
    };
    use crate::platform::{Actor, PromptId};

    struct Harness {
        handler: Arc<AlertHandler>,
        platform: Arc<RecordingPlatform>,
        telephony: Arc<RecordingTelephony>,
        ready: tokio::sync::mpsc::UnboundedReceiver<PromptId>,
    }

    fn harness_with(
        (platform, ready): (RecordingPlatform, tokio::sync::mpsc::UnboundedReceiver<PromptId>),
    ) -> Harness {
        let platform = Arc::new(platform);
        let telephony = Arc::new(RecordingTelephony::default());
        let handler = Arc::new(AlertHandler::new(
            &test_config(),
            platform.clone(),
            telephony.clone(),
        ));
        Harness {
            handler,
            platform,
            telephony,
            ready,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingPlatform::new())
    }

    fn confirm(target: PromptId, actor: Actor) -> ConfirmationSignal {
        ConfirmationSignal {
            target,
            affordance: Affordance::Confirm,
            actor,
        }
    }

    fn spawn_alert(
        h: &Harness,
        text: &str,
    ) -> tokio::task::JoinHandle<Result<Option<AlertStatus>>> {
        let handler = h.handler.clone();
        let msg = human_message(text);
        tokio::spawn(async move { handler.on_message(msg).await })
    }

    #[tokio::test]
    async fn test_ignores_bot_authors() {
        let h = harness();
        let mut msg = human_message("Pipe burst in basement");
        msg.author = bot_actor(99);

        assert_eq!(h.handler.on_message(msg).await.unwrap(), None);
        assert_eq!(h.platform.posts(), 0);
    }

    #[tokio::test]
    async fn test_ignores_other_channels() {
        let h = harness();
        let mut msg = human_message("Pipe burst in basement");
        msg.channel = ChannelId(-2002);

        assert_eq!(h.handler.on_message(msg).await.unwrap(), None);
        assert_eq!(h.platform.posts(), 0);
    }

    #[tokio::test]
    async fn test_ignores_blank_text() {
        let h = harness();
        assert_eq!(h.handler.on_message(human_message("  \n ")).await.unwrap(), None);
        assert_eq!(h.platform.posts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires_prompt_without_calls() {
        let h = harness();

        let status = h
            .handler
            .on_message(human_message("Pipe burst in basement"))
            .await
            .unwrap();

        assert_eq!(status, Some(AlertStatus::TimedOut));
        assert!(h.telephony.calls().is_empty());

        let prompt = prompt_id(100);
        let calls = h.platform.calls();
        assert_eq!(calls.len(), 6);
        match &calls[0] {
            PlatformCall::Post(channel, display) => {
                assert_eq!(*channel, ALERT_CHANNEL);
                assert_eq!(display.title, "Urgent Notification (Pending)");
            }
            other => panic!("expected post, got {:?}", other),
        }
        assert_eq!(calls[1], PlatformCall::Add(prompt, Affordance::Confirm));
        match &calls[2] {
            PlatformCall::Edit(id, display) => {
                assert_eq!(*id, prompt);
                assert_eq!(display.title, "Urgent Notification (Timed out)");
                assert_eq!(display.accent.rgb(), 0x000000);
            }
            other => panic!("expected edit, got {:?}", other),
        }
        assert_eq!(calls[3], PlatformCall::Remove(prompt, Affordance::Confirm));
        assert_eq!(calls[4], PlatformCall::Add(prompt, Affordance::Expired));
        assert_eq!(calls[5], PlatformCall::Forget(prompt));
        assert_eq!(h.handler.confirmations().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_dispatches_one_call_per_number() {
        let mut h = harness();
        let task = spawn_alert(&h, "Pipe burst in basement");

        let prompt = h.ready.recv().await.unwrap();
        assert!(h.handler.on_confirmation(confirm(prompt, human_actor(2, "Vic"))));

        let status = task.await.unwrap().unwrap();
        assert_eq!(status, Some(AlertStatus::Dispatched));

        let edits = h.platform.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].title, "Urgent Notification (Dispatched)");
        assert_eq!(edits[0].accent.rgb(), 0x88FF00);

        let placed = h.telephony.calls();
        assert_eq!(placed.len(), 2);
        assert_eq!(placed[0].to, "+15550001111");
        assert_eq!(placed[1].to, "+15550002222");
        for call in &placed {
            assert_eq!(call.from, "+15559990000");
            assert_eq!(call.spoken, "Emergency alert. Pipe burst in basement");
        }
        // Confirm button is left in place on the dispatched prompt.
        assert!(!h
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Remove(..))));
        assert_eq!(h.platform.calls().last(), Some(&PlatformCall::Forget(prompt)));
    }

    #[tokio::test]
    async fn test_repeated_confirmations_dispatch_once() {
        let mut h = harness();
        let task = spawn_alert(&h, "Smoke on floor 3");

        let prompt = h.ready.recv().await.unwrap();
        h.handler.on_confirmation(confirm(prompt, human_actor(2, "Vic")));
        h.handler.on_confirmation(confirm(prompt, human_actor(3, "Wen")));

        assert_eq!(task.await.unwrap().unwrap(), Some(AlertStatus::Dispatched));
        assert_eq!(h.telephony.calls().len(), 2);
        assert_eq!(h.platform.edits().len(), 1);

        // Presses after resolution find nobody waiting.
        assert!(!h.handler.on_confirmation(confirm(prompt, human_actor(4, "Xia"))));
        assert_eq!(h.telephony.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_qualifying_signals_do_not_dispatch() {
        let mut h = harness();
        let task = spawn_alert(&h, "Pipe burst in basement");

        let prompt = h.ready.recv().await.unwrap();
        let elsewhere = PromptId {
            channel: prompt.channel,
            message_id: prompt.message_id + 1,
        };
        h.handler.on_confirmation(confirm(elsewhere, human_actor(2, "Vic")));
        h.handler.on_confirmation(ConfirmationSignal {
            target: prompt,
            affordance: Affordance::Expired,
            actor: human_actor(2, "Vic"),
        });
        h.handler.on_confirmation(confirm(prompt, bot_actor(99)));

        assert_eq!(task.await.unwrap().unwrap(), Some(AlertStatus::TimedOut));
        assert!(h.telephony.calls().is_empty());
        let edits = h.platform.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].title, "Urgent Notification (Timed out)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_alerts_are_independent() {
        let mut h = harness();
        let first = spawn_alert(&h, "Pipe burst in basement");
        let first_prompt = h.ready.recv().await.unwrap();
        let second = spawn_alert(&h, "Power out in server room");
        let second_prompt = h.ready.recv().await.unwrap();
        assert_ne!(first_prompt, second_prompt);
        assert_eq!(h.handler.confirmations().pending_count(), 2);

        h.handler
            .on_confirmation(confirm(second_prompt, human_actor(2, "Vic")));

        assert_eq!(second.await.unwrap().unwrap(), Some(AlertStatus::Dispatched));
        assert_eq!(first.await.unwrap().unwrap(), Some(AlertStatus::TimedOut));

        let placed = h.telephony.calls();
        assert_eq!(placed.len(), 2);
        assert!(placed
            .iter()
            .all(|c| c.spoken == "Emergency alert. Power out in server room"));
    }

    #[tokio::test]
    async fn test_platform_failure_is_reported_not_dispatched() {
        let mut h = harness_with(RecordingPlatform::failing_edits());
        let task = spawn_alert(&h, "Pipe burst in basement");

        let prompt = h.ready.recv().await.unwrap();
        h.handler.on_confirmation(confirm(prompt, human_actor(2, "Vic")));

        let err = task.await.unwrap().unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to mark prompt as dispatched"));
        assert!(h.telephony.calls().is_empty());
        assert_eq!(h.platform.calls().last(), Some(&PlatformCall::Forget(prompt)));
        assert_eq!(h.handler.confirmations().pending_count(), 0);
    }
}
