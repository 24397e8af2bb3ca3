use std::sync::Arc;

use tokio::sync::watch;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_engine::audit::AuditRecorder;
use courier_engine::clock::SystemClock;
use courier_engine::dispatcher::{ChannelSet, Dispatcher};
use courier_engine::pacing::FixedDelayPacer;
use courier_engine::processor::ReminderProcessor;
use courier_engine::store::PgReminderStore;
use courier_notifier::{EmailConfig, ResendEmailChannel, WhatsAppChannel, WhatsAppConfig};
use courier_scheduler::poller::ReminderPoller;
use courier_scheduler::session::supervise_chat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_scheduler=info,courier_engine=info,courier_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Courier scheduler starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database and apply migrations
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    let store = Arc::new(PgReminderStore::new(pool));
    let clock = Arc::new(SystemClock);

    // Channel clients
    let email = Arc::new(ResendEmailChannel::new(EmailConfig::from_app_config(&config)));
    let chat = Arc::new(WhatsAppChannel::new(WhatsAppConfig::from_app_config(&config)));
    match chat.connect().await {
        Ok(state) => tracing::info!(state = %state, "Chat channel initialised"),
        Err(e) => tracing::warn!(error = %e, "Chat channel failed to connect; will retry"),
    }

    let dispatcher = Dispatcher::new(
        ChannelSet {
            email,
            chat: chat.clone(),
        },
        Arc::new(FixedDelayPacer::new(config.send_delay())),
        config.send_timeout(),
    );
    let processor = Arc::new(ReminderProcessor::new(
        store.clone(),
        store.clone(),
        dispatcher,
        AuditRecorder::new(store.clone()),
        clock.clone(),
    ));

    let poller = ReminderPoller::new(
        store,
        processor,
        clock,
        config.poll_interval(),
        config.poll_batch_size,
        config.stale_claim_after(),
    );

    // Claims left behind by a previous process
    let released = poller.recover_stale_claims().await;
    if released > 0 {
        tracing::warn!(released, "Recovered stale claims at startup");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = tokio::spawn(supervise_chat(
        chat,
        config.poll_interval(),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received shutdown signal, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    });

    // Returns once the tick in progress has finished
    poller.run(shutdown_rx).await;

    let _ = supervisor.await;
    tracing::info!("Courier scheduler stopped.");
    Ok(())
}
