//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_engine::audit::AuditRecorder;
use courier_engine::clock::Clock;
use courier_engine::lifecycle::ReminderLifecycle;
use courier_engine::retry::RetryController;
use courier_engine::store::{AuditLog, ReminderStore};
use courier_notifier::WhatsAppChannel;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ReminderLifecycle>,
    pub retries: Arc<RetryController>,
    pub chat: Arc<WhatsAppChannel>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new<S>(
        store: Arc<S>,
        chat: Arc<WhatsAppChannel>,
        clock: Arc<dyn Clock>,
        config: AppConfig,
    ) -> Self
    where
        S: ReminderStore + AuditLog + 'static,
    {
        let lifecycle = ReminderLifecycle::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            config.default_max_retries,
        );
        let retries = RetryController::new(store.clone(), AuditRecorder::new(store), clock);

        Self {
            lifecycle: Arc::new(lifecycle),
            retries: Arc::new(retries),
            chat,
            config,
        }
    }
}
