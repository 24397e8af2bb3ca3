//! Reminder operations invoked from the API layer: schedule, list, reschedule,
//! cancel, delete, history and status counts.
//!
//! All mutations refuse a reminder that is currently `Processing`, so a
//! request can never race an in-flight send.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DeliveryEvent, MAX_RECIPIENTS, MAX_RETRIES_LIMIT, NewReminder, Reminder, ReminderStatus,
    StatusCounts,
};

use crate::audit::AuditRecorder;
use crate::clock::Clock;
use crate::store::{AuditLog, ReminderStore};

pub struct ReminderLifecycle {
    store: Arc<dyn ReminderStore>,
    audit: Arc<dyn AuditLog>,
    recorder: AuditRecorder,
    clock: Arc<dyn Clock>,
    default_max_retries: i32,
}

impl ReminderLifecycle {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        default_max_retries: i32,
    ) -> Self {
        Self {
            store,
            recorder: AuditRecorder::new(audit.clone()),
            audit,
            clock,
            default_max_retries,
        }
    }

    /// Create a `Pending` reminder addressed to `recipient_ids`.
    pub async fn schedule(
        &self,
        params: &NewReminder,
        recipient_ids: &[Uuid],
        actor_id: Option<Uuid>,
    ) -> Result<Reminder, AppError> {
        if params.message.trim().is_empty() {
            return Err(AppError::Validation("Reminder message must not be empty".to_string()));
        }
        if recipient_ids.is_empty() {
            return Err(AppError::Validation(
                "A reminder needs at least one recipient".to_string(),
            ));
        }
        let max_retries = params.max_retries.unwrap_or(self.default_max_retries);
        if !(0..=MAX_RETRIES_LIMIT).contains(&max_retries) {
            return Err(AppError::Validation(format!(
                "max_retries must be between 0 and {MAX_RETRIES_LIMIT}"
            )));
        }

        let mut unique = Vec::with_capacity(recipient_ids.len());
        for id in recipient_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }

        if unique.len() > MAX_RECIPIENTS {
            return Err(AppError::Validation(format!(
                "A reminder can have at most {MAX_RECIPIENTS} recipients"
            )));
        }

        let now = self.clock.now();
        let reminder = Reminder {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            message: params.message.clone(),
            channel: params.channel,
            scheduled_at: params.scheduled_at,
            status: ReminderStatus::Pending,
            retry_count: 0,
            max_retries,
            failure_reason: None,
            sent_at: None,
            processed_at: None,
            last_retried_at: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert(&reminder, &unique).await?;
        self.recorder
            .record_created(&reminder, unique.len(), actor_id)
            .await;

        tracing::info!(
            reminder_id = %reminder.id,
            channel = %reminder.channel,
            scheduled_at = %reminder.scheduled_at,
            recipients = unique.len(),
            "Reminder scheduled"
        );

        Ok(reminder)
    }

    /// Every reminder, earliest `scheduled_at` first.
    pub async fn list(&self) -> Result<Vec<Reminder>, AppError> {
        self.store.list().await
    }

    /// Move a `Pending` reminder to `scheduled_at`.
    pub async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        actor_id: Option<Uuid>,
    ) -> Result<Reminder, AppError> {
        let current = self.load(id).await?;
        match current.status {
            ReminderStatus::Pending => {}
            ReminderStatus::Processing => return Err(processing_conflict(id)),
            status => return Err(not_reschedulable(id, status)),
        }

        let Some(moved) = self
            .store
            .reschedule(id, scheduled_at, self.clock.now())
            .await?
        else {
            let latest = self.load(id).await?;
            return Err(match latest.status {
                ReminderStatus::Processing => processing_conflict(id),
                status => not_reschedulable(id, status),
            });
        };

        self.recorder
            .record_rescheduled(&moved, current.scheduled_at, actor_id)
            .await;
        tracing::info!(
            reminder_id = %id,
            scheduled_at = %moved.scheduled_at,
            "Reminder rescheduled"
        );
        Ok(moved)
    }

    /// Stop a `Pending` reminder from ever being delivered.
    ///
    /// Cancelling an already cancelled reminder is a no-op.
    pub async fn cancel(&self, id: Uuid, actor_id: Option<Uuid>) -> Result<Reminder, AppError> {
        let current = self.load(id).await?;
        match current.status {
            ReminderStatus::Cancelled => return Ok(current),
            ReminderStatus::Pending => {}
            ReminderStatus::Processing => return Err(processing_conflict(id)),
            status => {
                return Err(AppError::Conflict(format!(
                    "Reminder {id} is {status} and can no longer be cancelled"
                )));
            }
        }

        let Some(cancelled) = self.store.mark_cancelled(id, self.clock.now()).await? else {
            let latest = self.load(id).await?;
            return Err(match latest.status {
                ReminderStatus::Processing => processing_conflict(id),
                status => AppError::Conflict(format!(
                    "Reminder {id} is {status} and can no longer be cancelled"
                )),
            });
        };

        self.recorder.record_cancelled(&cancelled, actor_id).await;
        tracing::info!(reminder_id = %id, "Reminder cancelled");
        Ok(cancelled)
    }

    /// Delete a reminder together with its recipient links and history.
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let current = self.load(id).await?;
        if current.status == ReminderStatus::Processing {
            return Err(processing_conflict(id));
        }

        if !self.store.delete(id).await? {
            // Either claimed or removed since the read.
            return match self.store.get(id).await? {
                Some(_) => Err(processing_conflict(id)),
                None => Err(AppError::NotFound(format!("Reminder {id} not found"))),
            };
        }

        tracing::info!(reminder_id = %id, "Reminder deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Reminder, AppError> {
        self.load(id).await
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<DeliveryEvent>, AppError> {
        self.load(id).await?;
        self.audit.history(id).await
    }

    pub async fn stats(&self) -> Result<StatusCounts, AppError> {
        self.store.status_counts().await
    }

    async fn load(&self, id: Uuid) -> Result<Reminder, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reminder {id} not found")))
    }
}

fn not_reschedulable(id: Uuid, status: ReminderStatus) -> AppError {
    AppError::Conflict(format!(
        "Reminder {id} is {status}; only pending reminders can be rescheduled"
    ))
}

fn processing_conflict(id: Uuid) -> AppError {
    AppError::Conflict(format!(
        "Reminder {id} is being processed; try again later"
    ))
}
