//! Outcome aggregation: turns per-recipient results into the next reminder state.
//!
//! | Condition                                   | Next status          |
//! |---------------------------------------------|----------------------|
//! | no recipients                               | `PermanentlyFailed`  |
//! | every recipient delivered                   | `Sent`               |
//! | some recipients delivered                   | `PartiallySent`      |
//! | none delivered, retries left                | `Pending`            |
//! | none delivered, retry cap reached           | `PermanentlyFailed`  |
//!
//! Only the zero-success branches with at least one recipient consume a retry.

use chrono::{DateTime, Utc};
use serde_json::json;

use courier_common::types::{DeliveryEventType, Reminder, ReminderStatus};

use crate::dispatcher::DispatchReport;
use crate::retry::{RetryDecision, RetryPolicy};

/// Everything written when a processing pass ends: the new reminder state
/// (which also releases the claim) and the audit record describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalization {
    pub status: ReminderStatus,
    pub retry_count: i32,
    pub failure_reason: Option<String>,
    /// Set when at least one recipient was reached.
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: DateTime<Utc>,
    pub event_type: DeliveryEventType,
    pub event_message: String,
    pub metadata: serde_json::Value,
}

/// Fold a dispatch report into the reminder's next state.
pub fn aggregate(reminder: &Reminder, report: &DispatchReport, now: DateTime<Utc>) -> Finalization {
    let total = report.total;
    let delivered = report.delivered;
    let last_error = report.last_error.as_deref().unwrap_or("unknown error");
    let metadata = json!({
        "success_count": delivered,
        "total": total,
        "last_error": report.last_error,
    });

    if total == 0 {
        tracing::warn!(reminder_id = %reminder.id, "No recipients associated with reminder");
        let reason = "No recipients associated".to_string();
        return Finalization {
            status: ReminderStatus::PermanentlyFailed,
            retry_count: reminder.retry_count,
            failure_reason: Some(reason.clone()),
            sent_at: None,
            processed_at: now,
            event_type: DeliveryEventType::Failed,
            event_message: reason,
            metadata: with_retry_count(metadata, reminder.retry_count),
        };
    }

    if delivered == total {
        return Finalization {
            status: ReminderStatus::Sent,
            retry_count: reminder.retry_count,
            failure_reason: None,
            sent_at: Some(now),
            processed_at: now,
            event_type: DeliveryEventType::Sent,
            event_message: format!("Delivered to all {total} recipients"),
            metadata: with_retry_count(metadata, reminder.retry_count),
        };
    }

    if delivered > 0 {
        return Finalization {
            status: ReminderStatus::PartiallySent,
            retry_count: reminder.retry_count,
            failure_reason: Some(format!(
                "Delivered to {delivered}/{total} recipients. Last error: {last_error}"
            )),
            sent_at: Some(now),
            processed_at: now,
            event_type: DeliveryEventType::Sent,
            event_message: format!("Delivered to {delivered}/{total} recipients"),
            metadata: with_retry_count(metadata, reminder.retry_count),
        };
    }

    failed_attempt(reminder, last_error, metadata, now)
}

/// State for a pass that ended with an error before a report was produced.
///
/// Counts as an attempt with zero deliveries, so the retry cap still applies.
pub fn aborted(reminder: &Reminder, error: &str, now: DateTime<Utc>) -> Finalization {
    let metadata = json!({
        "success_count": 0,
        "total": null,
        "last_error": error,
        "aborted": true,
    });
    failed_attempt(reminder, error, metadata, now)
}

fn failed_attempt(
    reminder: &Reminder,
    last_error: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) -> Finalization {
    let (status, retry_count, reason) =
        match RetryPolicy::after_failed_attempt(reminder.retry_count, reminder.max_retries) {
            RetryDecision::RetryLater { retry_count } => (
                ReminderStatus::Pending,
                retry_count,
                format!(
                    "Attempt {retry_count} of {} failed: {last_error}. Retrying later",
                    reminder.max_retries
                ),
            ),
            RetryDecision::Exhausted {
                retry_count,
                attempts,
            } => (
                ReminderStatus::PermanentlyFailed,
                retry_count,
                format!(
                    "Permanently failed after {attempts} {}. Last error: {last_error}",
                    if attempts == 1 { "attempt" } else { "attempts" }
                ),
            ),
        };

    Finalization {
        status,
        retry_count,
        failure_reason: Some(reason.clone()),
        sent_at: None,
        processed_at: now,
        event_type: DeliveryEventType::Failed,
        event_message: reason,
        metadata: with_retry_count(metadata, retry_count),
    }
}

fn with_retry_count(mut metadata: serde_json::Value, retry_count: i32) -> serde_json::Value {
    metadata["retry_count"] = json!(retry_count);
    metadata
}
