//! Reminder routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use courier_common::error::AppError;
use courier_common::types::{ChannelKind, DeliveryEvent, NewReminder, Reminder, StatusCounts};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reminders", get(list_reminders).post(create_reminder))
        .route("/api/reminders/stats", get(reminder_stats))
        .route(
            "/api/reminders/{id}",
            get(get_reminder)
                .put(reschedule_reminder)
                .delete(delete_reminder),
        )
        .route("/api/reminders/{id}/retry", post(retry_reminder))
        .route("/api/reminders/{id}/cancel", post(cancel_reminder))
        .route("/api/reminders/{id}/events", get(reminder_events))
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    pub user_id: Uuid,
    pub message: String,
    pub channel: ChannelKind,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: Option<i32>,
    pub recipient_ids: Vec<Uuid>,
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
}

/// Who asked for the change; recorded on the audit event.
#[derive(Debug, Default, Deserialize)]
pub struct ActorBody {
    pub actor_id: Option<Uuid>,
}

fn actor(body: Option<Json<ActorBody>>) -> Option<Uuid> {
    body.and_then(|Json(body)| body.actor_id)
}

/// POST /api/reminders: schedule a new reminder.
async fn create_reminder(
    State(state): State<AppState>,
    Json(req): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), AppError> {
    let params = NewReminder {
        user_id: req.user_id,
        message: req.message,
        channel: req.channel,
        scheduled_at: req.scheduled_at,
        max_retries: req.max_retries,
    };
    let reminder = state
        .lifecycle
        .schedule(&params, &req.recipient_ids, req.actor_id)
        .await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

/// GET /api/reminders: all reminders, earliest first.
async fn list_reminders(State(state): State<AppState>) -> Result<Json<Vec<Reminder>>, AppError> {
    Ok(Json(state.lifecycle.list().await?))
}

/// PUT /api/reminders/{id}: move a pending reminder to a new time.
async fn reschedule_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Reminder>, AppError> {
    let reminder = state
        .lifecycle
        .reschedule(id, req.scheduled_at, req.actor_id)
        .await?;
    Ok(Json(reminder))
}

/// GET /api/reminders/{id}
async fn get_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Reminder>, AppError> {
    Ok(Json(state.lifecycle.get(id).await?))
}

/// POST /api/reminders/{id}/retry: reset a failed reminder for redelivery.
async fn retry_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ActorBody>>,
) -> Result<Json<Reminder>, AppError> {
    let reminder = state.retries.retry(id, actor(body)).await?;
    Ok(Json(reminder))
}

/// POST /api/reminders/{id}/cancel
async fn cancel_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ActorBody>>,
) -> Result<Json<Reminder>, AppError> {
    let reminder = state.lifecycle.cancel(id, actor(body)).await?;
    Ok(Json(reminder))
}

/// DELETE /api/reminders/{id}
async fn delete_reminder(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.lifecycle.delete(id).await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

/// GET /api/reminders/{id}/events: audit trail, oldest first.
async fn reminder_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryEvent>>, AppError> {
    Ok(Json(state.lifecycle.history(id).await?))
}

/// GET /api/reminders/stats
async fn reminder_stats(State(state): State<AppState>) -> Result<Json<StatusCounts>, AppError> {
    Ok(Json(state.lifecycle.stats().await?))
}
