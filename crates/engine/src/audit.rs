//! Audit event recorder.
//!
//! Every processing pass gets its own correlation id, and every event written
//! during that pass carries it, so the history of one attempt can be rebuilt
//! from the `delivery_events` table. Writes are best effort: a failed append
//! is logged and never undoes the state change it describes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use courier_common::types::{
    DeliveryEvent, DeliveryEventType, NewDeliveryEvent, Reminder, ReminderStatus,
};

use crate::outcome::Finalization;
use crate::store::AuditLog;

/// One poller-triggered attempt on one reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingPass {
    pub reminder_id: Uuid,
    pub correlation_id: Uuid,
}

#[derive(Clone)]
pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }

    pub fn start_pass(&self, reminder_id: Uuid) -> ProcessingPass {
        ProcessingPass {
            reminder_id,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Record how a processing pass ended.
    pub async fn record_pass(
        &self,
        pass: &ProcessingPass,
        finalization: &Finalization,
    ) -> Option<DeliveryEvent> {
        self.write(NewDeliveryEvent {
            reminder_id: pass.reminder_id,
            event_type: finalization.event_type,
            message: finalization.event_message.clone(),
            correlation_id: Some(pass.correlation_id),
            actor_id: None,
            metadata: finalization.metadata.clone(),
        })
        .await
    }

    pub async fn record_created(
        &self,
        reminder: &Reminder,
        recipients: usize,
        actor_id: Option<Uuid>,
    ) -> Option<DeliveryEvent> {
        self.write(NewDeliveryEvent {
            reminder_id: reminder.id,
            event_type: DeliveryEventType::Created,
            message: format!(
                "Scheduled via {} for {} to {recipients} recipients",
                reminder.channel,
                reminder.scheduled_at.to_rfc3339()
            ),
            correlation_id: Some(Uuid::new_v4()),
            actor_id,
            metadata: json!({
                "max_retries": reminder.max_retries,
                "recipients": recipients,
            }),
        })
        .await
    }

    pub async fn record_retried(
        &self,
        reminder: &Reminder,
        previous_status: ReminderStatus,
        previous_retry_count: i32,
        actor_id: Option<Uuid>,
    ) -> Option<DeliveryEvent> {
        self.write(NewDeliveryEvent {
            reminder_id: reminder.id,
            event_type: DeliveryEventType::Retried,
            message: format!("Manual retry requested (was {previous_status})"),
            correlation_id: Some(Uuid::new_v4()),
            actor_id,
            metadata: json!({
                "previous_status": previous_status,
                "previous_retry_count": previous_retry_count,
                "retry_count": reminder.retry_count,
            }),
        })
        .await
    }

    pub async fn record_rescheduled(
        &self,
        reminder: &Reminder,
        previous_scheduled_at: DateTime<Utc>,
        actor_id: Option<Uuid>,
    ) -> Option<DeliveryEvent> {
        self.write(NewDeliveryEvent {
            reminder_id: reminder.id,
            event_type: DeliveryEventType::Updated,
            message: format!(
                "Rescheduled from {} to {}",
                previous_scheduled_at.to_rfc3339(),
                reminder.scheduled_at.to_rfc3339()
            ),
            correlation_id: Some(Uuid::new_v4()),
            actor_id,
            metadata: json!({
                "previous_scheduled_at": previous_scheduled_at,
                "scheduled_at": reminder.scheduled_at,
            }),
        })
        .await
    }

    pub async fn record_cancelled(
        &self,
        reminder: &Reminder,
        actor_id: Option<Uuid>,
    ) -> Option<DeliveryEvent> {
        self.write(NewDeliveryEvent {
            reminder_id: reminder.id,
            event_type: DeliveryEventType::Cancelled,
            message: "Reminder cancelled".to_string(),
            correlation_id: Some(Uuid::new_v4()),
            actor_id,
            metadata: json!({ "retry_count": reminder.retry_count }),
        })
        .await
    }

    async fn write(&self, event: NewDeliveryEvent) -> Option<DeliveryEvent> {
        match self.log.append(&event).await {
            Ok(written) => Some(written),
            Err(e) => {
                tracing::error!(
                    reminder_id = %event.reminder_id,
                    event_type = %event.event_type,
                    correlation_id = ?event.correlation_id,
                    error = %e,
                    "Failed to append delivery event"
                );
                None
            }
        }
    }
}
