use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound for a reminder's `max_retries`.
pub const MAX_RETRIES_LIMIT: i32 = 10;

/// Upper bound for the number of recipients of one reminder. Together with the
/// send timeout and delay this bounds how long a processing pass can run.
pub const MAX_RECIPIENTS: usize = 20;

/// Lifecycle state of a reminder. The only source of truth for eligibility
/// and terminality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    /// Claimed by a poller; the claim lock is held.
    Processing,
    Sent,
    PartiallySent,
    PermanentlyFailed,
    Cancelled,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Processing => "processing",
            ReminderStatus::Sent => "sent",
            ReminderStatus::PartiallySent => "partially_sent",
            ReminderStatus::PermanentlyFailed => "permanently_failed",
            ReminderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery medium of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Chat,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Chat => "chat",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a channel client's session with its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingPairing,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::AwaitingPairing => write!(f, "awaiting_pairing"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Kind of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEventType {
    Created,
    Updated,
    Sent,
    Failed,
    Retried,
    Cancelled,
}

impl DeliveryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEventType::Created => "created",
            DeliveryEventType::Updated => "updated",
            DeliveryEventType::Sent => "sent",
            DeliveryEventType::Failed => "failed",
            DeliveryEventType::Retried => "retried",
            DeliveryEventType::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for DeliveryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reminder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub channel: ChannelKind,
    pub scheduled_at: DateTime<Utc>,
    pub status: ReminderStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub failure_reason: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_retried_at: Option<DateTime<Utc>>,
    /// Set exactly while `status` is `Processing`.
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReminderStatus::Pending && self.scheduled_at <= now
    }

    pub fn claim_held(&self) -> bool {
        self.claimed_at.is_some()
    }
}

/// A client contact the reminder is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Recipient {
    /// Address to use on `channel`, if the contact has a non-blank one.
    pub fn contact_for(&self, channel: ChannelKind) -> Option<&str> {
        let field = match channel {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Chat => self.phone.as_deref(),
        };
        field.map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Immutable audit record for a reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryEvent {
    pub id: Uuid,
    pub reminder_id: Uuid,
    pub event_type: DeliveryEventType,
    pub message: String,
    pub correlation_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Audit record about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDeliveryEvent {
    pub reminder_id: Uuid,
    pub event_type: DeliveryEventType,
    pub message: String,
    pub correlation_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

/// Parameters for scheduling a new reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub user_id: Uuid,
    pub message: String,
    pub channel: ChannelKind,
    pub scheduled_at: DateTime<Utc>,
    /// Falls back to the configured default when absent.
    pub max_retries: Option<i32>,
}

/// Number of reminders per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub partially_sent: i64,
    pub permanently_failed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ReminderStatus, count: i64) {
        let slot = match status {
            ReminderStatus::Pending => &mut self.pending,
            ReminderStatus::Processing => &mut self.processing,
            ReminderStatus::Sent => &mut self.sent,
            ReminderStatus::PartiallySent => &mut self.partially_sent,
            ReminderStatus::PermanentlyFailed => &mut self.permanently_failed,
            ReminderStatus::Cancelled => &mut self.cancelled,
        };
        *slot += count;
    }
}
