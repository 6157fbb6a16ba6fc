// Scheduler binary entry point

use common::bootstrap;
use common::config::Settings;
use common::lock::PublishLockManager;
use common::notify::LogNotifier;
use common::scheduler::{Scheduler, SchedulerEngine};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    settings.validate().map_err(anyhow::Error::msg)?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(
        record_log = ?settings.record_log.backend,
        lock_storage = ?settings.lock_storage.backend,
        poll_interval_seconds = settings.scheduler.poll_interval_seconds,
        "Starting scheduled post publisher"
    );

    let log = bootstrap::init_record_log(&settings).await?;
    let storage = bootstrap::init_lock_storage(&settings).await?;
    let identity = bootstrap::init_identity(&settings)?;

    let locks = Arc::new(PublishLockManager::new(
        storage,
        settings
            .scheduler
            .lock_manager(&settings.lock_storage.key_prefix),
    ));
    let scheduler = Arc::new(SchedulerEngine::new(
        settings.scheduler.clone(),
        log,
        locks,
        identity,
        Arc::new(LogNotifier),
    ));

    let scheduler_for_shutdown = Arc::clone(&scheduler);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Received Ctrl+C signal, initiating graceful shutdown");
        if let Err(e) = scheduler_for_shutdown.stop().await {
            error!(error = %e, "Error during scheduler shutdown");
        }
    });

    let result = scheduler.start().await;
    telemetry::shutdown_tracer();

    if let Err(e) = result {
        error!(error = %e, "Scheduler error");
        return Err(anyhow::anyhow!(e));
    }

    info!("Scheduler stopped");
    Ok(())
}
