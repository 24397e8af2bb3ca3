//! Pause inserted between two sends of the same reminder.
//!
//! Providers throttle or flag bursts of messages from one sender, so
//! recipients of a reminder are contacted one at a time with a fixed gap.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait SendPacer: Send + Sync {
    async fn pause(&self);
}

pub struct FixedDelayPacer {
    delay: Duration,
}

impl FixedDelayPacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SendPacer for FixedDelayPacer {
    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}
