//! Poller tests against the in-memory store with a hand-driven clock.
//!
//! ```bash
//! cargo test -p courier-scheduler --test poller
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    ChannelKind, DeliveryEventType, Recipient, Reminder, ReminderStatus, StatusCounts,
};
use courier_engine::audit::AuditRecorder;
use courier_engine::clock::{Clock, ManualClock};
use courier_engine::dispatcher::{ChannelSet, Dispatcher};
use courier_engine::outcome::Finalization;
use courier_engine::pacing::FixedDelayPacer;
use courier_engine::processor::ReminderProcessor;
use courier_engine::store::{AuditLog, InMemoryReminderStore, ReminderStore};
use courier_notifier::StubChannel;
use courier_scheduler::{ReminderPoller, TickSummary};

const INTERVAL: Duration = Duration::from_secs(60);

// ============================================================
// Shared helpers
// ============================================================

struct Fixture {
    memory: Arc<InMemoryReminderStore>,
    email: Arc<StubChannel>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            memory: Arc::new(InMemoryReminderStore::new()),
            email: Arc::new(StubChannel::new()),
            clock: Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            )),
        }
    }

    fn poller(&self, batch_size: i64) -> ReminderPoller {
        self.poller_over(self.memory.clone(), batch_size)
    }

    /// Poller whose reminder queries go through `store`; recipients and
    /// events still come from the shared in-memory store.
    fn poller_over(&self, store: Arc<dyn ReminderStore>, batch_size: i64) -> ReminderPoller {
        let channels = ChannelSet {
            email: self.email.clone(),
            chat: Arc::new(StubChannel::new()),
        };
        let processor = ReminderProcessor::new(
            store.clone(),
            self.memory.clone(),
            Dispatcher::new(
                channels,
                Arc::new(FixedDelayPacer::new(Duration::ZERO)),
                Duration::from_secs(30),
            ),
            AuditRecorder::new(self.memory.clone()),
            self.clock.clone(),
        );
        ReminderPoller::new(
            store,
            Arc::new(processor),
            self.clock.clone(),
            INTERVAL,
            batch_size,
            chrono::Duration::minutes(10),
        )
    }

    fn reminder(&self, scheduled_at: DateTime<Utc>, max_retries: i32) -> Reminder {
        let client = Recipient {
            id: Uuid::new_v4(),
            name: "Grace".to_string(),
            email: Some(format!("{}@example.com", Uuid::new_v4().simple())),
            phone: None,
        };
        self.memory.add_client(client.clone());

        let reminder = Reminder {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            message: "Invoice due Friday".to_string(),
            channel: ChannelKind::Email,
            scheduled_at,
            status: ReminderStatus::Pending,
            retry_count: 0,
            max_retries,
            failure_reason: None,
            sent_at: None,
            processed_at: None,
            last_retried_at: None,
            claimed_at: None,
            created_at: scheduled_at,
            updated_at: scheduled_at,
        };
        self.memory.put_reminder(reminder.clone());
        self.memory.assign(reminder.id, client.id);
        reminder
    }

    fn due(&self, max_retries: i32) -> Reminder {
        self.reminder(self.clock.now() - chrono::Duration::minutes(1), max_retries)
    }

    async fn reload(&self, id: Uuid) -> Reminder {
        self.memory.get(id).await.unwrap().unwrap()
    }

    /// No reminder may hold a claim once the poller is idle.
    fn assert_no_claims_held(&self) {
        for r in self.memory.reminders() {
            assert_eq!(r.claimed_at.is_some(), r.status == ReminderStatus::Processing);
            assert_ne!(r.status, ReminderStatus::Processing, "reminder {} stuck", r.id);
            assert!(r.retry_count <= r.max_retries);
        }
    }
}

/// Store wrapper that can lose claims to a rival or fail the due query.
struct ContendedStore {
    inner: Arc<InMemoryReminderStore>,
    rival_claims_first: AtomicBool,
    fail_find_due: AtomicBool,
}

impl ContendedStore {
    fn new(inner: Arc<InMemoryReminderStore>) -> Self {
        Self {
            inner,
            rival_claims_first: AtomicBool::new(false),
            fail_find_due: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReminderStore for ContendedStore {
    async fn insert(&self, reminder: &Reminder, recipient_ids: &[Uuid]) -> Result<(), AppError> {
        self.inner.insert(reminder, recipient_ids).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, AppError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Reminder>, AppError> {
        self.inner.list().await
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Reminder>, AppError> {
        if self.fail_find_due.load(Ordering::SeqCst) {
            return Err(AppError::Internal("connection reset".to_string()));
        }
        let due = self.inner.find_due(now, limit).await?;
        if self.rival_claims_first.swap(false, Ordering::SeqCst) {
            if let Some(first) = due.first() {
                self.inner.claim(first.id, now).await?;
            }
        }
        Ok(due)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Reminder>, AppError> {
        self.inner.claim(id, now).await
    }

    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        finalization: &Finalization,
    ) -> Result<bool, AppError> {
        self.inner.finalize(id, claimed_at, finalization).await
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        self.inner.reschedule(id, scheduled_at, now).await
    }

    async fn reset_for_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        self.inner.reset_for_retry(id, now).await
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        self.inner.mark_cancelled(id, now).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        self.inner.delete(id).await
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        self.inner.release_stale_claims(claimed_before).await
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        self.inner.status_counts().await
    }
}

// ============================================================
// Tick
// ============================================================

#[tokio::test]
async fn test_tick_delivers_due_reminders_only() {
    let f = Fixture::new();
    let due = f.due(3);
    let later = f.reminder(f.clock.now() + chrono::Duration::hours(1), 3);

    let summary = f.poller(50).tick().await;
    assert_eq!(
        summary,
        TickSummary {
            released: 0,
            due: 1,
            processed: 1,
            skipped: 0,
        }
    );
    assert_eq!(f.reload(due.id).await.status, ReminderStatus::Sent);
    assert_eq!(f.reload(later.id).await.status, ReminderStatus::Pending);
    assert_eq!(f.email.sent().len(), 1);
    f.assert_no_claims_held();
}

#[tokio::test]
async fn test_failing_reminder_exhausts_retries_over_ticks() {
    let f = Fixture::new();
    f.email.fail_all("smtp relay refused");
    let reminder = f.due(3);
    let poller = f.poller(50);

    for _ in 0..3 {
        poller.tick().await;
        f.clock.advance(chrono::Duration::minutes(1));
    }

    let stored = f.reload(reminder.id).await;
    assert_eq!(stored.status, ReminderStatus::PermanentlyFailed);
    assert_eq!(stored.retry_count, 3);

    let events = f.memory.history(reminder.id).await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.event_type == DeliveryEventType::Failed));
    let mut correlation_ids: Vec<Uuid> = events.iter().filter_map(|e| e.correlation_id).collect();
    correlation_ids.sort();
    correlation_ids.dedup();
    assert_eq!(correlation_ids.len(), 3);

    // Terminal: nothing left for later ticks.
    let summary = poller.tick().await;
    assert_eq!(summary.due, 0);
    assert_eq!(f.memory.history(reminder.id).await.unwrap().len(), 3);
    f.assert_no_claims_held();
}

#[tokio::test]
async fn test_sent_reminder_is_not_sent_twice() {
    let f = Fixture::new();
    f.due(3);
    let poller = f.poller(50);

    poller.tick().await;
    f.clock.advance(chrono::Duration::minutes(5));
    let summary = poller.tick().await;

    assert_eq!(summary.due, 0);
    assert_eq!(f.email.sent().len(), 1);
}

#[tokio::test]
async fn test_batch_size_bounds_a_tick() {
    let f = Fixture::new();
    for _ in 0..5 {
        f.due(3);
    }
    let poller = f.poller(2);

    assert_eq!(poller.tick().await.processed, 2);
    assert_eq!(poller.tick().await.processed, 2);
    assert_eq!(poller.tick().await.processed, 1);
    assert_eq!(f.email.sent().len(), 5);
}

#[tokio::test]
async fn test_oldest_reminders_go_first() {
    let f = Fixture::new();
    let newer = f.reminder(f.clock.now() - chrono::Duration::minutes(1), 3);
    let older = f.reminder(f.clock.now() - chrono::Duration::minutes(30), 3);

    f.poller(1).tick().await;

    assert_eq!(f.reload(older.id).await.status, ReminderStatus::Sent);
    assert_eq!(f.reload(newer.id).await.status, ReminderStatus::Pending);
}

#[tokio::test]
async fn test_lost_claim_is_skipped() {
    let f = Fixture::new();
    let first = f.reminder(f.clock.now() - chrono::Duration::minutes(2), 3);
    let second = f.due(3);
    let store = Arc::new(ContendedStore::new(f.memory.clone()));
    store.rival_claims_first.store(true, Ordering::SeqCst);

    let summary = f.poller_over(store, 50).tick().await;

    assert_eq!(summary.due, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    // The rival still holds the first one; this poller never touched it.
    assert_eq!(f.reload(first.id).await.status, ReminderStatus::Processing);
    assert!(f.memory.history(first.id).await.unwrap().is_empty());
    assert_eq!(f.reload(second.id).await.status, ReminderStatus::Sent);
}

#[tokio::test]
async fn test_due_query_failure_does_not_panic() {
    let f = Fixture::new();
    let reminder = f.due(3);
    let store = Arc::new(ContendedStore::new(f.memory.clone()));
    store.fail_find_due.store(true, Ordering::SeqCst);
    let poller = f.poller_over(store.clone(), 50);

    let summary = poller.tick().await;
    assert_eq!(summary, TickSummary::default());
    assert_eq!(f.reload(reminder.id).await.status, ReminderStatus::Pending);

    // Next tick with a healthy store picks it up.
    store.fail_find_due.store(false, Ordering::SeqCst);
    assert_eq!(poller.tick().await.processed, 1);
}

#[tokio::test]
async fn test_stale_claim_is_recovered_and_processed() {
    let f = Fixture::new();
    let reminder = f.due(3);
    f.memory
        .claim(reminder.id, f.clock.now() - chrono::Duration::hours(1))
        .await
        .unwrap();

    let summary = f.poller(50).tick().await;

    assert_eq!(summary.released, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(f.reload(reminder.id).await.status, ReminderStatus::Sent);
}

#[tokio::test]
async fn test_fresh_claim_is_left_alone() {
    let f = Fixture::new();
    let reminder = f.due(3);
    f.memory
        .claim(reminder.id, f.clock.now() - chrono::Duration::minutes(2))
        .await
        .unwrap();

    let summary = f.poller(50).tick().await;

    assert_eq!(summary.released, 0);
    assert_eq!(summary.due, 0);
    assert_eq!(f.reload(reminder.id).await.status, ReminderStatus::Processing);
}

// ============================================================
// Run loop
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_run_ticks_on_interval() {
    let f = Fixture::new();
    f.due(3);
    let poller = Arc::new(f.poller(50));
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn({
        let poller = poller.clone();
        async move { poller.run(rx).await }
    });

    // First tick fires immediately.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.email.sent().len(), 1);

    f.due(3);
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(f.email.sent().len(), 2);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("poller should stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_when_sender_dropped() {
    let f = Fixture::new();
    let poller = f.poller(50);
    let (tx, rx) = watch::channel(false);
    drop(tx);

    tokio::time::timeout(Duration::from_secs(5), poller.run(rx))
        .await
        .expect("poller should stop");
}

#[tokio::test(start_paused = true)]
async fn test_run_does_nothing_after_shutdown() {
    let f = Fixture::new();
    f.due(3);
    let poller = f.poller(50);
    let (_tx, rx) = watch::channel(true);

    poller.run(rx).await;
    assert!(f.email.sent().is_empty());
}
