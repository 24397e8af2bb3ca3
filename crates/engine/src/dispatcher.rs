//! Delivery dispatcher: sends one claimed reminder to each of its recipients.
//!
//! Recipients are handled strictly in list order, one send at a time, with
//! the configured pause between two sends. A failure for one recipient is
//! recorded and the loop moves on; nothing raised by a single send can end
//! the pass early.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use uuid::Uuid;

use courier_common::types::{ChannelKind, ConnectionState, Recipient, Reminder};
use courier_notifier::{ChannelClient, SendReceipt};

use crate::pacing::SendPacer;

/// Why a single recipient was not reached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientFailure {
    #[error("no contact for channel")]
    ContactMissing,

    /// The chat session was not `Connected`; no send was attempted.
    #[error("channel disconnected")]
    ChannelUnavailable(ConnectionState),

    #[error("{0}")]
    SendFailed(String),

    #[error("send timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipientOutcome {
    pub recipient_id: Uuid,
    pub result: Result<SendReceipt, RecipientFailure>,
}

/// Per-reminder result of a dispatch pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub total: usize,
    pub delivered: usize,
    /// Last failure observed, for diagnostics only.
    pub last_error: Option<String>,
    pub outcomes: Vec<RecipientOutcome>,
}

impl DispatchReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn record(&mut self, recipient_id: Uuid, result: Result<SendReceipt, RecipientFailure>) {
        match &result {
            Ok(_) => self.delivered += 1,
            Err(failure) => self.last_error = Some(failure.to_string()),
        }
        self.outcomes.push(RecipientOutcome {
            recipient_id,
            result,
        });
    }
}

/// The channel clients available to the dispatcher.
#[derive(Clone)]
pub struct ChannelSet {
    pub email: Arc<dyn ChannelClient>,
    pub chat: Arc<dyn ChannelClient>,
}

impl ChannelSet {
    pub fn get(&self, kind: ChannelKind) -> &Arc<dyn ChannelClient> {
        match kind {
            ChannelKind::Email => &self.email,
            ChannelKind::Chat => &self.chat,
        }
    }
}

pub struct Dispatcher {
    channels: ChannelSet,
    pacer: Arc<dyn SendPacer>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: ChannelSet, pacer: Arc<dyn SendPacer>, send_timeout: Duration) -> Self {
        Self {
            channels,
            pacer,
            send_timeout,
        }
    }

    /// Attempt delivery of `reminder` to every recipient, in order.
    pub async fn dispatch(&self, reminder: &Reminder, recipients: &[Recipient]) -> DispatchReport {
        let client = self.channels.get(reminder.channel);
        let mut report = DispatchReport::new(recipients.len());
        // Once the chat session is seen down, the rest of the pass skips it.
        let mut unavailable: Option<ConnectionState> = None;
        let mut attempted = false;

        for recipient in recipients {
            let Some(address) = recipient.contact_for(reminder.channel) else {
                tracing::warn!(
                    reminder_id = %reminder.id,
                    recipient_id = %recipient.id,
                    channel = %reminder.channel,
                    "Recipient has no contact for channel"
                );
                report.record(recipient.id, Err(RecipientFailure::ContactMissing));
                continue;
            };

            if reminder.channel == ChannelKind::Chat && unavailable.is_none() {
                let state = self.chat_status(client.as_ref()).await;
                if state != ConnectionState::Connected {
                    tracing::warn!(
                        reminder_id = %reminder.id,
                        state = %state,
                        "Chat channel not connected; skipping remaining recipients"
                    );
                    unavailable = Some(state);
                }
            }
            if let Some(state) = unavailable {
                report.record(recipient.id, Err(RecipientFailure::ChannelUnavailable(state)));
                continue;
            }

            if attempted {
                self.pacer.pause().await;
            }
            attempted = true;

            let result = self.send_one(client.as_ref(), address, &reminder.message).await;
            match &result {
                Ok(receipt) => tracing::info!(
                    reminder_id = %reminder.id,
                    recipient_id = %recipient.id,
                    channel = %reminder.channel,
                    external_id = ?receipt.external_id,
                    "Reminder delivered to recipient"
                ),
                Err(failure) => tracing::warn!(
                    reminder_id = %reminder.id,
                    recipient_id = %recipient.id,
                    channel = %reminder.channel,
                    error = %failure,
                    "Delivery to recipient failed"
                ),
            }
            report.record(recipient.id, result);
        }

        report
    }

    /// Session health, bounded by the send timeout. A check that does not
    /// answer in time counts as `Disconnected`.
    async fn chat_status(&self, client: &dyn ChannelClient) -> ConnectionState {
        match tokio::time::timeout(self.send_timeout, client.status()).await {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.send_timeout.as_secs(),
                    "Chat status check timed out"
                );
                ConnectionState::Disconnected
            }
        }
    }

    async fn send_one(
        &self,
        client: &dyn ChannelClient,
        address: &str,
        text: &str,
    ) -> Result<SendReceipt, RecipientFailure> {
        let send = AssertUnwindSafe(client.send(address, text)).catch_unwind();
        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(Ok(receipt))) => Ok(receipt),
            Ok(Ok(Err(e))) => Err(RecipientFailure::SendFailed(e.to_string())),
            Ok(Err(panic)) => Err(RecipientFailure::SendFailed(format!(
                "channel client panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(RecipientFailure::TimedOut(self.send_timeout)),
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
