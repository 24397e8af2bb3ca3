//! Persistence for reminders, their recipients and their audit trail.
//!
//! Every state change the engine makes is a conditional update keyed on the
//! current status, so two pollers racing on the same row can never both win.

mod memory;
mod postgres;

pub use memory::InMemoryReminderStore;
pub use postgres::PgReminderStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DeliveryEvent, NewDeliveryEvent, Recipient, Reminder, StatusCounts,
};

use crate::outcome::Finalization;

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Persist a new reminder and link it to `recipient_ids`, keeping their order.
    async fn insert(&self, reminder: &Reminder, recipient_ids: &[Uuid]) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, AppError>;

    /// Every reminder, earliest `scheduled_at` first.
    async fn list(&self) -> Result<Vec<Reminder>, AppError>;

    /// `Pending` reminders with `scheduled_at <= now`, oldest first.
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Reminder>, AppError>;

    /// `Pending -> Processing` compare-and-swap. `None` when another claimant won.
    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Reminder>, AppError>;

    /// Write the outcome of a pass and release the claim.
    ///
    /// `claimed_at` is the claim token returned by `claim`: the update only
    /// applies while the reminder is still `Processing` under that same claim,
    /// so a pass whose claim was recovered and re-taken cannot release the
    /// newer holder. Returns whether a row was updated.
    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        finalization: &Finalization,
    ) -> Result<bool, AppError>;

    /// Return a `PartiallySent`/`PermanentlyFailed` reminder to `Pending`.
    async fn reset_for_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError>;

    /// Move a `Pending` reminder to a new `scheduled_at`.
    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError>;

    /// `Pending -> Cancelled` compare-and-swap.
    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError>;

    /// Delete a reminder that is not `Processing`, cascading its recipient
    /// links and events.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// Return claims taken before `claimed_before` to `Pending`.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;

    async fn status_counts(&self) -> Result<StatusCounts, AppError>;
}

/// Read access to the client contacts a reminder is addressed to.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn resolve_recipients(&self, reminder_id: Uuid) -> Result<Vec<Recipient>, AppError>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, event: &NewDeliveryEvent) -> Result<DeliveryEvent, AppError>;

    /// Events of one reminder in the order they were written.
    async fn history(&self, reminder_id: Uuid) -> Result<Vec<DeliveryEvent>, AppError>;
}
