//! WhatsApp Business Cloud API channel.
//!
//! The channel keeps its own session state. `connect()` verifies the
//! configured credentials against the Graph API and is serialized by a single
//! "connecting" guard, so overlapping callers never start a second handshake.
//! Sends are refused unless the session is `Connected`; nothing is queued.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use courier_common::config::AppConfig;
use courier_common::types::{ChannelKind, ConnectionState};

use crate::channel::{ChannelClient, ChannelError, SendReceipt};

const GRAPH_API_URL: &str = "https://graph.facebook.com";
const GRAPH_API_VERSION: &str = "v21.0";

/// Shortest phone number (in digits) the provider accepts.
const MIN_PHONE_DIGITS: usize = 10;

/// WhatsApp Business channel configuration.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token
    pub access_token: Option<String>,
    /// WhatsApp Phone Number ID
    pub phone_number_id: Option<String>,
    pub base_url: String,
}

impl WhatsAppConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            access_token: config.whatsapp_access_token.clone(),
            phone_number_id: config.whatsapp_phone_number_id.clone(),
            base_url: GRAPH_API_URL.to_string(),
        }
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        Some((
            self.access_token.as_deref()?,
            self.phone_number_id.as_deref()?,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

/// WhatsApp Business channel implementation.
pub struct WhatsAppChannel {
    config: WhatsAppConfig,
    client: reqwest::Client,
    state: RwLock<ConnectionState>,
    connecting: Mutex<()>,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig) -> Self {
        let initial = if config.credentials().is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::AwaitingPairing
        };
        Self {
            config,
            client: reqwest::Client::new(),
            state: RwLock::new(initial),
            connecting: Mutex::new(()),
        }
    }

    /// Establish the provider session.
    ///
    /// Returns the resulting state. When another caller is already connecting,
    /// returns immediately with the in-flight state instead of starting a
    /// second attempt.
    pub async fn connect(&self) -> Result<ConnectionState, ChannelError> {
        let Ok(_guard) = self.connecting.try_lock() else {
            tracing::debug!("WhatsApp connection attempt already in progress");
            return Ok(self.status().await);
        };

        if *self.state.read().await == ConnectionState::Connected {
            return Ok(ConnectionState::Connected);
        }

        let Some((token, phone_number_id)) = self.config.credentials() else {
            self.set_state(ConnectionState::AwaitingPairing).await;
            tracing::warn!("WhatsApp credentials missing; waiting for account to be linked");
            return Ok(ConnectionState::AwaitingPairing);
        };

        self.set_state(ConnectionState::Connecting).await;

        let url = format!(
            "{}/{}/{}",
            self.config.base_url, GRAPH_API_VERSION, phone_number_id
        );
        let response = match self.client.get(&url).bearer_auth(token).send().await {
            Ok(response) => response,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected).await;
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.set_state(ConnectionState::Disconnected).await;
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "WhatsApp credential check failed");
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        self.set_state(ConnectionState::Connected).await;
        tracing::info!("WhatsApp channel connected");
        Ok(ConnectionState::Connected)
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        let previous = *state;
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "WhatsApp connection state changed");
            *state = next;
        }
    }
}

/// Strip formatting from a phone number, keeping digits only.
pub fn normalize_phone(raw: &str) -> Result<String, ChannelError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(ChannelError::InvalidAddress(raw.to_string()));
    }
    Ok(digits)
}

#[async_trait]
impl ChannelClient for WhatsAppChannel {
    async fn status(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn send(&self, address: &str, text: &str) -> Result<SendReceipt, ChannelError> {
        let to = normalize_phone(address)?;

        let state = self.status().await;
        if state != ConnectionState::Connected {
            return Err(ChannelError::NotConnected(state));
        }

        let (token, phone_number_id) = self
            .config
            .credentials()
            .ok_or(ChannelError::NotConfigured(ChannelKind::Chat))?;

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let response = self
            .client
            .post(format!(
                "{}/{}/{}/messages",
                self.config.base_url, GRAPH_API_VERSION, phone_number_id
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Token revoked or expired: the session is gone until reconnected.
            self.set_state(ConnectionState::Disconnected).await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SendResponse = response.json().await?;
        let external_id = parsed.messages.into_iter().next().map(|m| m.id);
        tracing::debug!(to = %to, message_id = ?external_id, "WhatsApp message accepted");

        Ok(SendReceipt { external_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> WhatsAppConfig {
        WhatsAppConfig {
            access_token: Some("token".to_string()),
            phone_number_id: Some("12345".to_string()),
            base_url: base_url.to_string(),
        }
    }

    async fn mount_credential_check(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .and(path("/v21.0/12345"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({})))
            .mount(server)
            .await;
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-9999").unwrap(), "15550109999");
        assert!(normalize_phone("555-0100").is_err());
        assert!(normalize_phone("").is_err());
    }

    #[tokio::test]
    async fn test_starts_awaiting_pairing_without_credentials() {
        let channel = WhatsAppChannel::new(WhatsAppConfig {
            access_token: None,
            phone_number_id: None,
            base_url: "http://unused".to_string(),
        });
        assert_eq!(channel.status().await, ConnectionState::AwaitingPairing);
        assert_eq!(
            channel.connect().await.unwrap(),
            ConnectionState::AwaitingPairing
        );
    }

    #[tokio::test]
    async fn test_connect_verifies_credentials() {
        let server = MockServer::start().await;
        mount_credential_check(&server, 200).await;

        let channel = WhatsAppChannel::new(config(&server.uri()));
        assert_eq!(channel.status().await, ConnectionState::Disconnected);
        assert_eq!(channel.connect().await.unwrap(), ConnectionState::Connected);
        assert_eq!(channel.status().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_failed_credential_check_stays_disconnected() {
        let server = MockServer::start().await;
        mount_credential_check(&server, 401).await;

        let channel = WhatsAppChannel::new(config(&server.uri()));
        assert!(channel.connect().await.is_err());
        assert_eq!(channel.status().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_overlapping_connects_issue_one_handshake() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v21.0/12345"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WhatsAppChannel::new(config(&server.uri()));
        let (first, second) = tokio::join!(channel.connect(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            channel.connect().await
        });

        assert_eq!(first.unwrap(), ConnectionState::Connected);
        assert_eq!(second.unwrap(), ConnectionState::Connecting);
        assert_eq!(channel.status().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_send_refused_while_disconnected() {
        let channel = WhatsAppChannel::new(config("http://unused"));
        let err = channel.send("+15550109999", "hi").await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::NotConnected(ConnectionState::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_send_returns_message_id() {
        let server = MockServer::start().await;
        mount_credential_check(&server, 200).await;
        Mock::given(method("POST"))
            .and(path("/v21.0/12345/messages"))
            .and(body_partial_json(serde_json::json!({
                "to": "15550109999",
                "text": { "body": "Dentist at 10" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "wamid.abc" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WhatsAppChannel::new(config(&server.uri()));
        channel.connect().await.unwrap();
        let receipt = channel.send("+1 555 010 9999", "Dentist at 10").await.unwrap();
        assert_eq!(receipt.external_id.as_deref(), Some("wamid.abc"));
    }

    #[tokio::test]
    async fn test_unauthorized_send_drops_session() {
        let server = MockServer::start().await;
        mount_credential_check(&server, 200).await;
        Mock::given(method("POST"))
            .and(path("/v21.0/12345/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired token"))
            .mount(&server)
            .await;

        let channel = WhatsAppChannel::new(config(&server.uri()));
        channel.connect().await.unwrap();
        let err = channel.send("15550109999", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::Rejected { status: 401, .. }));
        assert_eq!(channel.status().await, ConnectionState::Disconnected);
    }
}
