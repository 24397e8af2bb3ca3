//! Retry cap and manual retry.
//!
//! Automatic retries have no delay of their own: a reminder returned to
//! `Pending` keeps its `scheduled_at` and is picked up again on a later poller
//! tick. The per-reminder `max_retries` column is the only cap consulted.
//!
//! A manual retry bypasses the cap. It is accepted only for terminal failures
//! (`PartiallySent`, `PermanentlyFailed`) and resets the reminder to a fresh,
//! immediately due `Pending` state.

use std::sync::Arc;

use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{Reminder, ReminderStatus};

use crate::audit::AuditRecorder;
use crate::clock::Clock;
use crate::store::ReminderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `Pending` with the incremented count.
    RetryLater { retry_count: i32 },
    /// No attempts left. `retry_count` never exceeds `max_retries`.
    Exhausted { retry_count: i32, attempts: i32 },
}

pub struct RetryPolicy;

impl RetryPolicy {
    /// Decide what happens after an attempt that reached nobody.
    pub fn after_failed_attempt(retry_count: i32, max_retries: i32) -> RetryDecision {
        let attempts = retry_count + 1;
        if attempts >= max_retries {
            RetryDecision::Exhausted {
                retry_count: attempts.min(max_retries).max(0),
                attempts,
            }
        } else {
            RetryDecision::RetryLater {
                retry_count: attempts,
            }
        }
    }

    /// Whether a manual retry may be applied to `reminder` in its current state.
    pub fn ensure_manual_retry_allowed(reminder: &Reminder) -> Result<(), AppError> {
        match reminder.status {
            ReminderStatus::PartiallySent | ReminderStatus::PermanentlyFailed => Ok(()),
            ReminderStatus::Processing => Err(AppError::Conflict(format!(
                "Reminder {} is being processed; try again later",
                reminder.id
            ))),
            ReminderStatus::Sent => Err(AppError::Conflict(format!(
                "Reminder {} was already delivered",
                reminder.id
            ))),
            status @ (ReminderStatus::Pending | ReminderStatus::Cancelled) => {
                Err(AppError::Conflict(format!(
                    "Reminder {} is {status}; only failed or partially sent reminders can be retried",
                    reminder.id
                )))
            }
        }
    }
}

/// Applies manual retries requested through the API.
pub struct RetryController {
    store: Arc<dyn ReminderStore>,
    recorder: AuditRecorder,
    clock: Arc<dyn Clock>,
}

impl RetryController {
    pub fn new(store: Arc<dyn ReminderStore>, recorder: AuditRecorder, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            recorder,
            clock,
        }
    }

    /// Reset a failed reminder so the next poller tick delivers it again.
    pub async fn retry(&self, id: Uuid, actor_id: Option<Uuid>) -> Result<Reminder, AppError> {
        let current = self.load(id).await?;
        RetryPolicy::ensure_manual_retry_allowed(&current)?;

        let now = self.clock.now();
        let Some(updated) = self.store.reset_for_retry(id, now).await? else {
            // The row moved between the read and the conditional update.
            let latest = self.load(id).await?;
            RetryPolicy::ensure_manual_retry_allowed(&latest)?;
            return Err(AppError::Conflict(format!(
                "Reminder {id} changed concurrently; try again"
            )));
        };

        self.recorder
            .record_retried(&updated, current.status, current.retry_count, actor_id)
            .await;

        tracing::info!(
            reminder_id = %id,
            previous_status = %current.status,
            "Manual retry scheduled"
        );

        Ok(updated)
    }

    async fn load(&self, id: Uuid) -> Result<Reminder, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reminder {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_later_until_cap() {
        assert_eq!(
            RetryPolicy::after_failed_attempt(0, 3),
            RetryDecision::RetryLater { retry_count: 1 }
        );
        assert_eq!(
            RetryPolicy::after_failed_attempt(1, 3),
            RetryDecision::RetryLater { retry_count: 2 }
        );
        assert_eq!(
            RetryPolicy::after_failed_attempt(2, 3),
            RetryDecision::Exhausted {
                retry_count: 3,
                attempts: 3
            }
        );
    }

    #[test]
    fn test_retry_count_never_exceeds_cap() {
        for max in 0..=10 {
            for count in 0..=max {
                let next = match RetryPolicy::after_failed_attempt(count, max) {
                    RetryDecision::RetryLater { retry_count } => retry_count,
                    RetryDecision::Exhausted { retry_count, .. } => retry_count,
                };
                assert!((0..=max).contains(&next), "count {count} max {max} -> {next}");
            }
        }
    }

    #[test]
    fn test_single_attempt_when_cap_is_one() {
        assert_eq!(
            RetryPolicy::after_failed_attempt(0, 1),
            RetryDecision::Exhausted {
                retry_count: 1,
                attempts: 1
            }
        );
    }
}
