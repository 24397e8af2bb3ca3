use async_trait::async_trait;
use thiserror::Error;

use courier_common::error::AppError;
use courier_common::types::{ChannelKind, ConnectionState};

/// Provider acknowledgement for a delivered message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    /// Provider-side message id, when the provider returns one.
    pub external_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0} channel is not configured")]
    NotConfigured(ChannelKind),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("channel not connected ({0})")]
    NotConnected(ConnectionState),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<ChannelError> for AppError {
    fn from(err: ChannelError) -> Self {
        AppError::Channel(err.to_string())
    }
}

/// A delivery medium the dispatcher can send reminders through.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    /// Current session health. Channels without a session are always connected.
    async fn status(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    /// Deliver `text` to `address` (an email address or a phone number).
    async fn send(&self, address: &str, text: &str) -> Result<SendReceipt, ChannelError>;
}
