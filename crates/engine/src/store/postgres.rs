use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{
    DeliveryEvent, NewDeliveryEvent, Recipient, Reminder, ReminderStatus, StatusCounts,
};

use super::{AuditLog, ClientDirectory, ReminderStore};
use crate::outcome::Finalization;

const REMINDER_COLUMNS: &str = "id, user_id, message, channel, scheduled_at, status, retry_count, \
     max_retries, failure_reason, sent_at, processed_at, last_retried_at, claimed_at, \
     created_at, updated_at";

const EVENT_COLUMNS: &str =
    "id, reminder_id, event_type, message, correlation_id, actor_id, metadata, created_at";

/// Postgres-backed store for reminders, recipients and delivery events.
#[derive(Clone)]
pub struct PgReminderStore {
    pool: PgPool,
}

impl PgReminderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn insert(&self, reminder: &Reminder, recipient_ids: &[Uuid]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let known: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM clients WHERE id = ANY($1)")
            .bind(recipient_ids)
            .fetch_all(&mut *tx)
            .await?;
        if let Some(missing) = recipient_ids
            .iter()
            .find(|id| !known.iter().any(|(k,)| k == *id))
        {
            return Err(AppError::Validation(format!("Unknown client {missing}")));
        }

        sqlx::query(
            r#"
            INSERT INTO reminders (id, user_id, message, channel, scheduled_at, status,
                                   retry_count, max_retries, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(reminder.id)
        .bind(reminder.user_id)
        .bind(&reminder.message)
        .bind(reminder.channel.as_str())
        .bind(reminder.scheduled_at)
        .bind(reminder.status.as_str())
        .bind(reminder.retry_count)
        .bind(reminder.max_retries)
        .bind(reminder.created_at)
        .bind(reminder.updated_at)
        .execute(&mut *tx)
        .await?;

        for client_id in recipient_ids {
            sqlx::query(
                r#"
                INSERT INTO reminder_clients (reminder_id, client_id)
                VALUES ($1, $2)
                ON CONFLICT (reminder_id, client_id) DO NOTHING
                "#,
            )
            .bind(reminder.id)
            .bind(client_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| unknown_client(e, *client_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reminder>, AppError> {
        let reminder = sqlx::query_as::<_, Reminder>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reminder)
    }

    async fn list(&self) -> Result<Vec<Reminder>, AppError> {
        let reminders = sqlx::query_as::<_, Reminder>(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders ORDER BY scheduled_at, created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(reminders)
    }

    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Reminder>, AppError> {
        let reminders = sqlx::query_as::<_, Reminder>(&format!(
            r#"
            SELECT {REMINDER_COLUMNS} FROM reminders
            WHERE status = 'pending' AND scheduled_at <= $1
            ORDER BY scheduled_at
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(reminders)
    }

    async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Reminder>, AppError> {
        let claimed = sqlx::query_as::<_, Reminder>(&format!(
            r#"
            UPDATE reminders
            SET status = 'processing', claimed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed)
    }

    async fn finalize(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        finalization: &Finalization,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE reminders
            SET status = $2,
                retry_count = $3,
                failure_reason = $4,
                sent_at = COALESCE($5, sent_at),
                processed_at = $6,
                claimed_at = NULL,
                updated_at = $6
            WHERE id = $1 AND status = 'processing' AND claimed_at = $7
            "#,
        )
        .bind(id)
        .bind(finalization.status.as_str())
        .bind(finalization.retry_count)
        .bind(&finalization.failure_reason)
        .bind(finalization.sent_at)
        .bind(finalization.processed_at)
        .bind(claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_for_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let reminder = sqlx::query_as::<_, Reminder>(&format!(
            r#"
            UPDATE reminders
            SET status = 'pending',
                retry_count = 0,
                failure_reason = NULL,
                scheduled_at = $2,
                last_retried_at = $2,
                updated_at = $2
            WHERE id = $1 AND status IN ('partially_sent', 'permanently_failed')
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reminder)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let reminder = sqlx::query_as::<_, Reminder>(&format!(
            r#"
            UPDATE reminders
            SET scheduled_at = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(scheduled_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reminder)
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, AppError> {
        let reminder = sqlx::query_as::<_, Reminder>(&format!(
            r#"
            UPDATE reminders
            SET status = 'cancelled', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {REMINDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reminder)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = $1 AND status <> 'processing'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE reminders
            SET status = 'pending', claimed_at = NULL, updated_at = NOW()
            WHERE status = 'processing' AND claimed_at < $1
            RETURNING id
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let rows: Vec<(ReminderStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM reminders GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count);
        }
        Ok(counts)
    }
}

/// A client deleted between the existence check and the link insert still
/// surfaces as a validation error, not a database one.
fn unknown_client(err: sqlx::Error, client_id: Uuid) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => {
            AppError::Validation(format!("Unknown client {client_id}"))
        }
        _ => AppError::Database(err),
    }
}

#[async_trait]
impl ClientDirectory for PgReminderStore {
    async fn resolve_recipients(&self, reminder_id: Uuid) -> Result<Vec<Recipient>, AppError> {
        let recipients = sqlx::query_as::<_, Recipient>(
            r#"
            SELECT c.id, c.name, c.email, c.phone
            FROM reminder_clients rc
            JOIN clients c ON c.id = rc.client_id
            WHERE rc.reminder_id = $1
            ORDER BY rc.position
            "#,
        )
        .bind(reminder_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(recipients)
    }
}

#[async_trait]
impl AuditLog for PgReminderStore {
    async fn append(&self, event: &NewDeliveryEvent) -> Result<DeliveryEvent, AppError> {
        let written = sqlx::query_as::<_, DeliveryEvent>(&format!(
            r#"
            INSERT INTO delivery_events (id, reminder_id, event_type, message, correlation_id,
                                         actor_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(event.reminder_id)
        .bind(event.event_type.as_str())
        .bind(&event.message)
        .bind(event.correlation_id)
        .bind(event.actor_id)
        .bind(&event.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(written)
    }

    async fn history(&self, reminder_id: Uuid) -> Result<Vec<DeliveryEvent>, AppError> {
        let events = sqlx::query_as::<_, DeliveryEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM delivery_events WHERE reminder_id = $1 ORDER BY seq"
        ))
        .bind(reminder_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
