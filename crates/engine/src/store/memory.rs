use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DeliveryEvent, NewDeliveryEvent, Recipient, Reminder, ReminderStatus, StatusCounts,
};

use super::{AuditLog, ClientDirectory, ReminderStore};
use crate::outcome::Finalization;

#[derive(Default)]
struct MemoryState {
    reminders: HashMap<Uuid, Reminder>,
    clients: HashMap<Uuid, Recipient>,
    /// `(reminder_id, client_id)` in insertion order.
    assignments: Vec<(Uuid, Uuid)>,
    events: Vec<DeliveryEvent>,
}

/// Process-local store with the same conditional-update semantics as the
/// Postgres one. Used by tests and local runs without a database.
#[derive(Default)]
pub struct InMemoryReminderStore {
    state: Mutex<MemoryState>,
}

impl InMemoryReminderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a client contact that reminders can be addressed to.
    pub fn add_client(&self, recipient: Recipient) {
        self.lock().clients.insert(recipient.id, recipient);
    }

    /// Overwrite a reminder row as-is, bypassing every state check.
    pub fn put_reminder(&self, reminder: Reminder) {
        self.lock().reminders.insert(reminder.id, reminder);
    }

    pub fn assign(&self, reminder_id: Uuid, client_id: Uuid) {
        let mut state = self.lock();
        if !state.assignments.contains(&(reminder_id, client_id)) {
            state.assignments.push((reminder_id, client_id));
        }
    }

    pub fn reminders(&self) -> Vec<Reminder> {
        self.lock().reminders.values().cloned().collect()
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.lock().events.clone()
    }
}

#[async_trait]
impl ReminderStore for InMemoryReminderStore {
    async fn insert(&self, reminder: &Reminder, recipient_ids: &[Uuid]) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.reminders.contains_key(&reminder.id) {
            return Err(AppError::Conflict(format!(
                "Reminder {} already exists",
                reminder.id
            )));
        }
        if let Some(missing) = recipient_ids.iter().find(|id| !state.clients.contains_key(id)) {
            return Err(AppError::Validation(format!("Unknown client {missing}")));
        }

        state.reminders.insert(reminder.id, reminder.clone());
        for client_id in recipient_ids {
            if !state.assignments.contains(&(reminder.id, *client_id)) {
                state.assignments.push((reminder.id, *client_id));
            }
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, AppError> {
        Ok(self.lock().reminders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Reminder>, AppError> {
        let mut all = self.reminders();
        all.sort_by_key(|r| (r.scheduled_at, r.created_at));
        Ok(all)
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Reminder>, AppError> {
        let state = self.lock();
        let mut due: Vec<Reminder> = state
            .reminders
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.scheduled_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Reminder>, AppError> {
        let mut state = self.lock();
        match state.reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.status = ReminderStatus::Processing;
                r.claimed_at = Some(now);
                r.updated_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        finalization: &Finalization,
    ) -> Result<bool, AppError> {
        let mut state = self.lock();
        match state.reminders.get_mut(&id) {
            Some(r)
                if r.status == ReminderStatus::Processing && r.claimed_at == Some(claimed_at) =>
            {
                r.status = finalization.status;
                r.retry_count = finalization.retry_count;
                r.failure_reason = finalization.failure_reason.clone();
                if finalization.sent_at.is_some() {
                    r.sent_at = finalization.sent_at;
                }
                r.processed_at = Some(finalization.processed_at);
                r.claimed_at = None;
                r.updated_at = finalization.processed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_for_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let mut state = self.lock();
        match state.reminders.get_mut(&id) {
            Some(r)
                if matches!(
                    r.status,
                    ReminderStatus::PartiallySent | ReminderStatus::PermanentlyFailed
                ) =>
            {
                r.status = ReminderStatus::Pending;
                r.retry_count = 0;
                r.failure_reason = None;
                r.scheduled_at = now;
                r.last_retried_at = Some(now);
                r.updated_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let mut state = self.lock();
        match state.reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.scheduled_at = scheduled_at;
                r.updated_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let mut state = self.lock();
        match state.reminders.get_mut(&id) {
            Some(r) if r.status == ReminderStatus::Pending => {
                r.status = ReminderStatus::Cancelled;
                r.updated_at = now;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.lock();
        match state.reminders.get(&id) {
            Some(r) if r.status != ReminderStatus::Processing => {
                state.reminders.remove(&id);
                state.assignments.retain(|(reminder_id, _)| *reminder_id != id);
                state.events.retain(|e| e.reminder_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut state = self.lock();
        let mut released = Vec::new();
        for r in state.reminders.values_mut() {
            let stale = r.status == ReminderStatus::Processing
                && r.claimed_at.is_some_and(|at| at < claimed_before);
            if stale {
                r.status = ReminderStatus::Pending;
                r.claimed_at = None;
                released.push(r.id);
            }
        }
        Ok(released)
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let mut counts = StatusCounts::default();
        for r in self.lock().reminders.values() {
            counts.add(r.status, 1);
        }
        Ok(counts)
    }
}

#[async_trait]
impl ClientDirectory for InMemoryReminderStore {
    async fn resolve_recipients(&self, reminder_id: Uuid) -> Result<Vec<Recipient>, AppError> {
        let state = self.lock();
        Ok(state
            .assignments
            .iter()
            .filter(|(r, _)| *r == reminder_id)
            .filter_map(|(_, c)| state.clients.get(c).cloned())
            .collect())
    }
}

#[async_trait]
impl AuditLog for InMemoryReminderStore {
    async fn append(&self, event: &NewDeliveryEvent) -> Result<DeliveryEvent, AppError> {
        let mut state = self.lock();
        if !state.reminders.contains_key(&event.reminder_id) {
            return Err(AppError::NotFound(format!(
                "Reminder {} not found",
                event.reminder_id
            )));
        }
        let written = DeliveryEvent {
            id: Uuid::new_v4(),
            reminder_id: event.reminder_id,
            event_type: event.event_type,
            message: event.message.clone(),
            correlation_id: event.correlation_id,
            actor_id: event.actor_id,
            metadata: event.metadata.clone(),
            created_at: Utc::now(),
        };
        state.events.push(written.clone());
        Ok(written)
    }

    async fn history(&self, reminder_id: Uuid) -> Result<Vec<DeliveryEvent>, AppError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.reminder_id == reminder_id)
            .cloned()
            .collect())
    }
}
