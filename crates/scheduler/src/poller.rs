use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use courier_engine::clock::Clock;
use courier_engine::processor::ReminderProcessor;
use courier_engine::store::ReminderStore;

/// What one tick did. Returned for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Orphaned claims returned to `Pending` before selection.
    pub released: usize,
    /// Candidates returned by the due query.
    pub due: usize,
    /// Candidates claimed and run through a processing pass.
    pub processed: usize,
    /// Candidates lost to another claimant or to a storage error.
    pub skipped: usize,
}

/// Fixed-interval loop that claims due reminders and processes them one by one.
pub struct ReminderPoller {
    store: Arc<dyn ReminderStore>,
    processor: Arc<ReminderProcessor>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch_size: i64,
    stale_claim_after: chrono::Duration,
}

impl ReminderPoller {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        processor: Arc<ReminderProcessor>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch_size: i64,
        stale_claim_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            interval,
            batch_size,
            stale_claim_after,
        }
    }

    /// Tick until `shutdown` turns `true` or its sender is dropped.
    ///
    /// The first tick fires immediately. A tick in progress is always
    /// finished before the loop exits, so no claim is abandoned mid-pass.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Reminder poller started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    if summary.due > 0 || summary.released > 0 {
                        tracing::info!(
                            released = summary.released,
                            due = summary.due,
                            processed = summary.processed,
                            skipped = summary.skipped,
                            "Poller tick complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reminder poller stopped");
    }

    /// One pass over the due reminders.
    pub async fn tick(&self) -> TickSummary {
        let mut summary = TickSummary {
            released: self.recover_stale_claims().await,
            ..TickSummary::default()
        };

        let now = self.clock.now();
        let due = match self.store.find_due(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query due reminders");
                return summary;
            }
        };
        summary.due = due.len();

        for candidate in due {
            match self.store.claim(candidate.id, self.clock.now()).await {
                Ok(Some(claimed)) => {
                    self.processor.process(claimed).await;
                    summary.processed += 1;
                }
                Ok(None) => {
                    tracing::debug!(reminder_id = %candidate.id, "Reminder already claimed, skipping");
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(
                        reminder_id = %candidate.id,
                        error = %e,
                        "Failed to claim reminder"
                    );
                    summary.skipped += 1;
                }
            }
        }

        summary
    }

    /// Return claims older than the stale threshold to `Pending`.
    pub async fn recover_stale_claims(&self) -> usize {
        let cutoff = self.clock.now() - self.stale_claim_after;
        match self.store.release_stale_claims(cutoff).await {
            Ok(released) => {
                for id in &released {
                    tracing::warn!(reminder_id = %id, "Released stale claim");
                }
                released.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to release stale claims");
                0
            }
        }
    }
}
