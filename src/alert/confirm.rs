//! Routing of confirmation signals to the prompt waiting for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::alert::Affordance;
use crate::platform::{Actor, ConfirmationSignal, PromptId};

type Waiters = HashMap<PromptId, mpsc::UnboundedSender<ConfirmationSignal>>;

// Stand-in deadline for windows too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Outcome of waiting on a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(Actor),
    TimedOut,
}

/// Table of prompts currently awaiting confirmation.
#[derive(Clone, Default)]
pub struct ConfirmationHub {
    waiters: Arc<Mutex<Waiters>>,
}

impl ConfirmationHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        // Entries are plain senders; a poisoned table is still consistent.
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start listening for signals targeting `prompt`.
    pub fn register(&self, prompt: PromptId) -> PendingConfirmation {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(prompt, tx);
        PendingConfirmation {
            prompt,
            rx,
            hub: self.clone(),
        }
    }

    /// Forward a signal to whoever waits on its target. Returns false when no
    /// prompt with that identity is pending.
    pub fn publish(&self, signal: ConfirmationSignal) -> bool {
        let waiters = self.lock();
        match waiters.get(&signal.target) {
            Some(tx) => tx.send(signal).is_ok(),
            None => {
                debug!("No pending prompt for {:?}", signal.target);
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }
}

/// A registered wait. Unregisters itself when dropped.
pub struct PendingConfirmation {
    prompt: PromptId,
    rx: mpsc::UnboundedReceiver<ConfirmationSignal>,
    hub: ConfirmationHub,
}

impl PendingConfirmation {
    fn qualifies(&self, signal: &ConfirmationSignal) -> bool {
        signal.target == self.prompt
            && signal.affordance == Affordance::Confirm
            && !signal.actor.is_bot
    }

    /// Wait for the first qualifying signal, or until `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Confirmation {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(signal)) if self.qualifies(&signal) => {
                    return Confirmation::Confirmed(signal.actor);
                }
                Ok(Some(signal)) => {
                    debug!(
                        "Ignoring {:?} from {} on {:?}",
                        signal.affordance, signal.actor, self.prompt
                    );
                }
                // The hub holds the sender for as long as we are registered.
                Ok(None) => return Confirmation::TimedOut,
                Err(_) => return Confirmation::TimedOut,
            }
        }
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        self.hub.lock().remove(&self.prompt);
    }
}
