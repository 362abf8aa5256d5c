use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

use crate::config::TwilioConfig;
use crate::telephony::Telephony;

#[derive(Debug, Deserialize)]
struct CallResponse {
    sid: String,
}

/// Twilio Programmable Voice client.
pub struct TwilioClient {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: Secret<String>,
}

impl TwilioClient {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }
}

/// Inline TwiML that reads `spoken` aloud once.
pub fn say_twiml(spoken: &str) -> String {
    format!("<Response><Say>{}</Say></Response>", escape_xml(spoken))
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl Telephony for TwilioClient {
    async fn place_call(&self, to: &str, from: &str, spoken: &str) -> Result<String> {
        let url = self.calls_url();
        let twiml = say_twiml(spoken);

        debug!("Sending call request to Twilio: {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("To", to), ("From", from), ("Twiml", twiml.as_str())])
            .send()
            .await
            .context("Failed to send request to Twilio")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Twilio API error ({}): {}", status, error_body);
        }

        let call: CallResponse = response
            .json()
            .await
            .context("Failed to parse Twilio response")?;

        Ok(call.sid)
    }
}
