//! Shared fixtures for the engine tests: an in-memory store, stub channels,
//! a hand-driven clock and a pacer that only counts.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use courier_common::types::{
    ChannelKind, DeliveryEvent, Recipient, Reminder, ReminderStatus,
};
use courier_engine::audit::AuditRecorder;
use courier_engine::clock::{Clock, ManualClock};
use courier_engine::dispatcher::{ChannelSet, Dispatcher};
use courier_engine::lifecycle::ReminderLifecycle;
use courier_engine::pacing::SendPacer;
use courier_engine::processor::ReminderProcessor;
use courier_engine::retry::RetryController;
use courier_engine::store::{AuditLog, ClientDirectory, InMemoryReminderStore, ReminderStore};
use courier_notifier::StubChannel;

pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Pacer that records how often it was asked to wait.
#[derive(Default)]
pub struct CountingPacer {
    pauses: AtomicUsize,
}

impl CountingPacer {
    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SendPacer for CountingPacer {
    async fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub store: Arc<InMemoryReminderStore>,
    pub email: Arc<StubChannel>,
    pub chat: Arc<StubChannel>,
    pub pacer: Arc<CountingPacer>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryReminderStore::new()),
            email: Arc::new(StubChannel::new()),
            chat: Arc::new(StubChannel::new()),
            pacer: Arc::new(CountingPacer::default()),
            clock: Arc::new(ManualClock::new(start_time())),
        }
    }

    pub fn channels(&self) -> ChannelSet {
        ChannelSet {
            email: self.email.clone(),
            chat: self.chat.clone(),
        }
    }

    pub fn recorder(&self) -> AuditRecorder {
        AuditRecorder::new(self.store.clone())
    }

    pub fn dispatcher(&self, send_timeout: Duration) -> Dispatcher {
        Dispatcher::new(self.channels(), self.pacer.clone(), send_timeout)
    }

    pub fn processor(&self) -> ReminderProcessor {
        self.processor_with_directory(self.store.clone())
    }

    pub fn processor_with_directory(
        &self,
        directory: Arc<dyn ClientDirectory>,
    ) -> ReminderProcessor {
        ReminderProcessor::new(
            self.store.clone(),
            directory,
            self.dispatcher(SEND_TIMEOUT),
            self.recorder(),
            self.clock.clone(),
        )
    }

    pub fn retry_controller(&self) -> RetryController {
        RetryController::new(self.store.clone(), self.recorder(), self.clock.clone())
    }

    pub fn lifecycle(&self) -> ReminderLifecycle {
        ReminderLifecycle::new(self.store.clone(), self.store.clone(), self.clock.clone(), 3)
    }

    pub fn client(&self, name: &str, email: Option<&str>, phone: Option<&str>) -> Recipient {
        let recipient = Recipient {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.map(String::from),
            phone: phone.map(String::from),
        };
        self.store.add_client(recipient.clone());
        recipient
    }

    /// A due `Pending` reminder linked to `recipients`.
    pub fn due_reminder(
        &self,
        channel: ChannelKind,
        max_retries: i32,
        recipients: &[&Recipient],
    ) -> Reminder {
        let now = self.clock.now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            message: "Team sync moved to 3pm".to_string(),
            channel,
            scheduled_at: now - chrono::Duration::minutes(1),
            status: ReminderStatus::Pending,
            retry_count: 0,
            max_retries,
            failure_reason: None,
            sent_at: None,
            processed_at: None,
            last_retried_at: None,
            claimed_at: None,
            created_at: now - chrono::Duration::hours(1),
            updated_at: now - chrono::Duration::hours(1),
        };
        self.store.put_reminder(reminder.clone());
        for r in recipients {
            self.store.assign(reminder.id, r.id);
        }
        reminder
    }

    /// Claim `id` the way the poller does, panicking if it is not claimable.
    pub async fn claim(&self, id: Uuid) -> Reminder {
        self.store
            .claim(id, self.clock.now())
            .await
            .unwrap()
            .expect("reminder should be claimable")
    }

    pub async fn reload(&self, id: Uuid) -> Reminder {
        self.store.get(id).await.unwrap().expect("reminder exists")
    }

    pub async fn history(&self, id: Uuid) -> Vec<DeliveryEvent> {
        self.store.history(id).await.unwrap()
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
}
