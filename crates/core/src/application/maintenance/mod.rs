// History maintenance
// Periodic pruning of finished deployment records

use crate::application::work_queue::ShutdownToken;
use crate::error::Result;
use crate::port::{DeploymentRepository, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Default history retention (30 days)
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default pruning interval (6 hours)
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Maintenance scheduler
///
/// Deletes finished records older than the retention window. The latest
/// record of every unit is always kept because change detection and
/// dependency gating read it.
pub struct MaintenanceScheduler {
    deployments: Arc<dyn DeploymentRepository>,
    time_provider: Arc<dyn TimeProvider>,
    retention_days: u32,
    every: Duration,
}

impl MaintenanceScheduler {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        time_provider: Arc<dyn TimeProvider>,
        retention_days: u32,
        every: Duration,
    ) -> Self {
        Self {
            deployments,
            time_provider,
            retention_days,
            every,
        }
    }

    /// Run until shutdown (first pass happens immediately)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.every.as_secs(),
            retention_days = self.retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.every);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            if let Err(e) = self.run_now().await {
                error!(error = ?e, "Scheduled maintenance failed");
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Prune once, returns the number of deleted records
    pub async fn run_now(&self) -> Result<u64> {
        let cutoff =
            self.time_provider.now_millis() - i64::from(self.retention_days) * MILLIS_PER_DAY;
        let pruned = self.deployments.prune_finished_before(cutoff).await?;
        if pruned > 0 {
            info!(pruned = pruned, cutoff = cutoff, "Old deployment records pruned");
        }
        Ok(pruned)
    }
}
