//! SMS provider seam
//!
//! The service talks to a trait; the HTTP implementation speaks the
//! Twilio message API shape. Tests swap in a stub.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SmsConfig;
use crate::error::{Error, Result};

/// What the provider reports for an accepted message
#[derive(Debug, Clone)]
pub struct ProviderAccepted {
    /// Provider-side message id (`MessageSid`)
    pub message_id: String,
    /// Initial provider status (`queued`, `accepted`, …)
    pub status: String,
}

/// Outbound SMS transport
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Submit one message
    async fn send(&self, to: &str, body: &str) -> Result<ProviderAccepted>;
}

/// Twilio-style HTTP provider
pub struct HttpSmsProvider {
    client: reqwest::Client,
    api_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl HttpSmsProvider {
    /// Build from configuration; `None` when credentials are incomplete
    pub fn from_config(config: &SmsConfig) -> Option<Self> {
        Some(Self {
            client: reqwest::Client::new(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.twilio.com/2010-04-01".to_string()),
            account_sid: config.account_sid.clone()?,
            auth_token: config.auth_token.clone()?,
            from_number: config.from_number.clone()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TwilioErrorResponse {
    message: Option<String>,
}

#[async_trait]
impl SmsProvider for HttpSmsProvider {
    async fn send(&self, to: &str, body: &str) -> Result<ProviderAccepted> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.api_url, self.account_sid
        );
        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::internal(format!("sms provider request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let accepted: TwilioMessageResponse = response
                .json()
                .await
                .map_err(|e| Error::internal(format!("sms provider response malformed: {e}")))?;
            Ok(ProviderAccepted {
                message_id: accepted.sid,
                status: accepted.status,
            })
        } else {
            let detail: Option<TwilioErrorResponse> = response.json().await.ok();
            let message = detail
                .and_then(|d| d.message)
                .unwrap_or_else(|| format!("provider returned {status}"));
            Err(Error::internal(format!("sms provider rejected send: {message}")))
        }
    }
}
