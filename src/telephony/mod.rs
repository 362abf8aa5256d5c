pub mod twilio;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::config::{AlertConfig, TwilioConfig};
use crate::platform::IncomingMessage;

/// Places a single outbound voice call.
#[async_trait]
pub trait Telephony: Send + Sync {
    /// Call `to` from `from`, speaking `spoken`. Returns the provider's call id.
    async fn place_call(&self, to: &str, from: &str, spoken: &str) -> Result<String>;
}

/// Reads an alert aloud to every configured destination.
pub struct CallDispatcher {
    telephony: Arc<dyn Telephony>,
    numbers: Vec<String>,
    number_from: String,
    initial_message: String,
}

impl CallDispatcher {
    pub fn new(telephony: Arc<dyn Telephony>, twilio: &TwilioConfig, alert: &AlertConfig) -> Self {
        Self {
            telephony,
            numbers: twilio.numbers.clone(),
            number_from: twilio.number_from.clone(),
            initial_message: alert.initial_message.clone(),
        }
    }

    pub fn spoken_text(&self, message: &IncomingMessage) -> String {
        format!("{} {}", self.initial_message, message.clean_content())
    }

    /// Call each destination once, in order. A failed call does not stop the
    /// remaining ones; all failures are reported together afterwards.
    pub async fn dispatch(&self, message: &IncomingMessage) -> Result<Vec<String>> {
        let content = message.clean_content();
        let spoken = self.spoken_text(message);
        let mut sids = Vec::with_capacity(self.numbers.len());
        let mut failed = Vec::new();

        for number in &self.numbers {
            info!("Calling {} with message {}", number, content);
            match self
                .telephony
                .place_call(number, &self.number_from, &spoken)
                .await
            {
                Ok(sid) => {
                    info!("Initiated call with SID {}", sid);
                    sids.push(sid);
                }
                Err(e) => {
                    error!("Call to {} failed: {:#}", number, e);
                    failed.push(number.as_str());
                }
            }
        }

        if !failed.is_empty() {
            bail!(
                "{} of {} calls failed: {}",
                failed.len(),
                self.numbers.len(),
                failed.join(", ")
            );
        }
        Ok(sids)
    }
}
