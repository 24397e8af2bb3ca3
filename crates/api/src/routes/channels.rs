//! Chat session routes.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::types::ConnectionState;
use courier_notifier::ChannelClient;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/channels/chat/status", get(chat_status))
        .route("/api/channels/chat/connect", post(connect_chat))
}

#[derive(Debug, Serialize)]
pub struct ChannelStatus {
    pub channel: &'static str,
    pub state: ConnectionState,
}

impl ChannelStatus {
    fn chat(state: ConnectionState) -> Self {
        Self {
            channel: "chat",
            state,
        }
    }
}

/// GET /api/channels/chat/status
async fn chat_status(State(state): State<AppState>) -> Json<ChannelStatus> {
    Json(ChannelStatus::chat(state.chat.status().await))
}

/// POST /api/channels/chat/connect: start (or join) a connection attempt.
async fn connect_chat(State(state): State<AppState>) -> Result<Json<ChannelStatus>, AppError> {
    let connected = state.chat.connect().await?;
    Ok(Json(ChannelStatus::chat(connected)))
}
