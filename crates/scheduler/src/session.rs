//! Keeps the chat session alive while the scheduler runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use courier_common::types::ConnectionState;
use courier_notifier::{ChannelClient, WhatsAppChannel};

/// Reconnect the chat channel whenever it is found `Disconnected`.
///
/// `AwaitingPairing` is left alone: it needs an operator, not a retry.
pub async fn supervise_chat(
    chat: Arc<WhatsAppChannel>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if chat.status().await == ConnectionState::Disconnected {
                    match chat.connect().await {
                        Ok(state) => tracing::info!(state = %state, "Chat reconnect attempt finished"),
                        Err(e) => tracing::warn!(error = %e, "Chat reconnect failed"),
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
