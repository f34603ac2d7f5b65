//! Shiparr - Main Entry Point
//! Git-driven docker compose deployments: scheduler -> work queue -> engine

mod config;
mod delivery;

use anyhow::{Context, Result};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::DaemonConfig;
use delivery::DeliverySync;
use shiparr_core::application::deployer::{Credentials, TokenResolver};
use shiparr_core::application::maintenance::DEFAULT_MAINTENANCE_INTERVAL;
use shiparr_core::application::{
    shutdown_channel, DeployTrigger, DeploymentEngine, EnginePorts, EngineSettings, GitSync,
    MaintenanceScheduler, ProjectLocks, RecoveryService, Scheduler, ShutdownToken, WorkQueue,
    WorkQueueConfig,
};
use shiparr_core::port::time_provider::SystemTimeProvider;
use shiparr_core::port::{CommandRunner, TimeProvider, UnitRepository};
use shiparr_infra_sqlite::{
    create_pool, run_migrations, SqliteDeliverySettings, SqliteDeploymentRepository,
    SqliteUnitRepository,
};
use shiparr_infra_system::{
    NotificationRoutes, ReqwestHttpProbe, ShoutrrrNotifier, SopsDecryptor, TokioCommandRunner,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long in-flight deployments may run after ctrl-c
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    init_logging()?;
    info!("Shiparr v{} starting...", VERSION);

    // 2. Load configuration
    let config = DaemonConfig::from_env()?;
    info!(
        db_path = %config.db_path.display(),
        max_concurrent = config.max_concurrent,
        prune_images = config.prune_images,
        notify_destinations = config.notify_urls.len(),
        "Configuration loaded"
    );

    // 3. Initialize database
    if let Some(parent) = config.db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    let pool = create_pool(&config.database_url())
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let units = Arc::new(SqliteUnitRepository::new(pool.clone()));
    let deployments = Arc::new(SqliteDeploymentRepository::new(pool.clone()));
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());

    // 5. Close records left pending by a previous crash
    let recovery = RecoveryService::new(deployments.clone(), time_provider.clone());
    match recovery.recover_interrupted().await {
        Ok(count) => info!(recovered_deployments = count, "Crash recovery completed"),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    let notifier = Arc::new(ShoutrrrNotifier::new(
        runner.clone(),
        NotificationRoutes::all(config.notify_urls.clone()),
    ));
    let tokens = Arc::new(TokenResolver::new(Credentials {
        global_github_token: config.github_token.clone(),
        ..Credentials::default()
    }));
    let delivery = Arc::new(DeliverySync {
        store: SqliteDeliverySettings::new(pool.clone()),
        tokens: tokens.clone(),
        notifier: notifier.clone(),
        global_github_token: config.github_token.clone(),
    });
    delivery.load().await?;

    let ports = EnginePorts {
        units: units.clone(),
        deployments: deployments.clone(),
        runner: runner.clone(),
        probe: Arc::new(
            ReqwestHttpProbe::new().map_err(|e| anyhow::anyhow!("HTTP probe setup failed: {}", e))?,
        ),
        secrets: Arc::new(SopsDecryptor::new(runner.clone())),
        notifier,
        time_provider: time_provider.clone(),
    };
    let settings = EngineSettings {
        self_marker: config.self_marker.clone(),
        prune_images: config.prune_images,
        ..EngineSettings::default()
    };

    // One registry shared by the engine and the queue
    let locks = Arc::new(ProjectLocks::new());
    let engine = Arc::new(DeploymentEngine::new(
        ports,
        Arc::new(GitSync::new(runner.clone())),
        tokens,
        locks.clone(),
        settings,
    ));

    // 6. Start the work queue
    let queue = Arc::new(WorkQueue::new(
        WorkQueueConfig {
            max_concurrent: config.max_concurrent,
            dependency_retry_delay: config.dependency_retry,
        },
        units.clone(),
        deployments.clone(),
        engine,
        locks,
    ));
    queue.start().await;

    // 7. Start the scheduler, ticks enqueue with the unit's current priority
    let scheduler = Arc::new(Scheduler::new(enqueue_trigger(units.clone(), queue.clone())));
    let initial = units
        .list_all()
        .await
        .map_err(|e| anyhow::anyhow!("Loading units failed: {}", e))?;
    scheduler.reschedule_all(&initial);
    scheduler.start();
    info!(units = initial.len(), "Scheduler started");

    // 8. Background loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let refresh_handle = tokio::spawn(refresh_units(
        units.clone(),
        scheduler.clone(),
        delivery,
        config.unit_refresh,
        shutdown_rx,
    ));

    let maintenance = MaintenanceScheduler::new(
        deployments,
        time_provider,
        config.retention_days,
        DEFAULT_MAINTENANCE_INTERVAL,
    );
    let maintenance_handle = tokio::spawn(maintenance.run(shutdown_tx.token()));

    info!("System ready. Watching units...");
    info!("Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown: no new triggers, drop queued work, let running deployments end
    scheduler.stop();
    shutdown_tx.shutdown();
    queue.stop().await;
    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, queue.join())
        .await
        .is_err()
    {
        warn!(
            remaining = queue.outstanding(),
            "Deployments still running at shutdown; they will be marked interrupted on next start"
        );
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), refresh_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), maintenance_handle).await;

    info!("Shutdown complete.");
    Ok(())
}

/// JSON for production (`SHIPARR_LOG_FORMAT=json`), pretty otherwise
fn init_logging() -> Result<()> {
    let log_format = std::env::var("SHIPARR_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("shiparr=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty())
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

/// Scheduler callback: look up the unit and queue it
fn enqueue_trigger(units: Arc<dyn UnitRepository>, queue: Arc<WorkQueue>) -> DeployTrigger {
    Arc::new(move |unit_id| {
        let units = units.clone();
        let queue = queue.clone();
        async move {
            match units.find_by_id(unit_id).await {
                Ok(Some(unit)) => queue.enqueue(unit.id, unit.priority),
                Ok(None) => debug!(unit_id = unit_id, "Scheduled unit no longer exists"),
                Err(e) => error!(unit_id = unit_id, error = %e, "Loading scheduled unit failed"),
            }
        }
        .boxed()
    })
}

/// Keep the scheduler, tokens and notification routes in step with the store
async fn refresh_units(
    units: Arc<dyn UnitRepository>,
    scheduler: Arc<Scheduler>,
    delivery: Arc<DeliverySync>,
    every: Duration,
    mut shutdown: ShutdownToken,
) {
    let mut tick = tokio::time::interval(every);
    // the first tick completes immediately and startup already scheduled
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.wait() => break,
        }

        match units.list_all().await {
            Ok(current) => scheduler.reschedule_all(&current),
            Err(e) => error!(error = %e, "Unit refresh failed"),
        }
        if let Err(e) = delivery.load().await {
            error!(error = %e, "Delivery settings refresh failed");
        }
    }
}
