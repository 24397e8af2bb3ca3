//! Email channel backed by the Resend HTTP API.

use async_trait::async_trait;
use serde::Deserialize;

use courier_common::config::AppConfig;
use courier_common::types::{ChannelKind, ConnectionState};

use crate::channel::{ChannelClient, ChannelError, SendReceipt};

const RESEND_API_URL: &str = "https://api.resend.com";

/// Resend credentials and message envelope.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: Option<String>,
    pub subject: String,
    pub base_url: String,
}

impl EmailConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.resend_api_key.clone(),
            from: config.email_from.clone(),
            subject: config.email_subject.clone(),
            base_url: RESEND_API_URL.to_string(),
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.api_key.as_deref()?, self.from.as_deref()?))
    }
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

pub struct ResendEmailChannel {
    config: EmailConfig,
    client: reqwest::Client,
}

impl ResendEmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        if config.credentials().is_none() {
            tracing::warn!("RESEND_API_KEY or EMAIL_FROM missing; email delivery will fail");
        }
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ChannelClient for ResendEmailChannel {
    async fn status(&self) -> ConnectionState {
        if self.config.credentials().is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn send(&self, address: &str, text: &str) -> Result<SendReceipt, ChannelError> {
        let (api_key, from) = self
            .config
            .credentials()
            .ok_or(ChannelError::NotConfigured(ChannelKind::Email))?;

        if !address.contains('@') {
            return Err(ChannelError::InvalidAddress(address.to_string()));
        }

        let body = serde_json::json!({
            "from": from,
            "to": [address],
            "subject": self.config.subject,
            "text": text,
        });

        let response = self
            .client
            .post(format!("{}/emails", self.config.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ResendResponse = response.json().await?;
        tracing::debug!(to = %address, message_id = ?parsed.id, "Email accepted by Resend");

        Ok(SendReceipt {
            external_id: parsed.id,
        })
    }
}
