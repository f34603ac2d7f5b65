// Startup recovery of deployments cut short by a daemon crash
use crate::domain::DeploymentStatus;
use crate::port::{DeploymentRepository, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Log line appended to records closed by recovery
pub const INTERRUPTED_LOG: &str = "Deployment interrupted: daemon stopped before it finished";

/// Crash recovery service
///
/// Nothing can still be running when the daemon starts, so every `pending`
/// record left behind belongs to a deployment that died with the previous
/// process. Those records are closed as `failed` so the latest record of
/// each unit reflects reality (dependents gate on it).
pub struct RecoveryService {
    deployments: Arc<dyn DeploymentRepository>,
    time_provider: Arc<dyn TimeProvider>,
}

impl RecoveryService {
    pub fn new(
        deployments: Arc<dyn DeploymentRepository>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            deployments,
            time_provider,
        }
    }

    /// Fail every pending record, returns how many were closed
    pub async fn recover_interrupted(&self) -> crate::error::Result<usize> {
        let pending = self
            .deployments
            .find_by_status(DeploymentStatus::Pending)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let now = self.time_provider.now_millis();
        let mut recovered = 0;
        for mut record in pending {
            let logs = match record.logs.take() {
                Some(existing) if !existing.is_empty() => {
                    format!("{}\n{}", existing, INTERRUPTED_LOG)
                }
                _ => INTERRUPTED_LOG.to_string(),
            };
            record.fail(logs, now)?;
            self.deployments.update(&record).await?;

            warn!(
                deployment_id = record.id,
                unit_id = record.unit_id,
                commit = %record.commit_hash,
                "Interrupted deployment marked as failed"
            );
            recovered += 1;
        }

        info!(recovered_count = recovered, "Deployment recovery complete");
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeploymentRecord;
    use crate::port::deployment_repository::mocks::InMemoryDeploymentRepository;
    use crate::port::time_provider::mocks::MockTimeProvider;

    #[tokio::test]
    async fn test_pending_records_are_failed() {
        let repo = InMemoryDeploymentRepository::new();
        let pending = repo
            .insert(&DeploymentRecord::start(1, "abc", 1_000))
            .await
            .unwrap();
        let done = repo
            .insert(&DeploymentRecord::completed(2, "def", DeploymentStatus::Success, "ok", 500))
            .await
            .unwrap();

        let service = RecoveryService::new(
            Arc::new(repo.clone()),
            Arc::new(MockTimeProvider::new(5_000)),
        );
        assert_eq!(service.recover_interrupted().await.unwrap(), 1);

        let record = repo.find_by_id(pending).await.unwrap().unwrap();
        assert_eq!(record.status, DeploymentStatus::Failed);
        assert_eq!(record.finished_at, Some(5_000));
        assert_eq!(record.logs.as_deref(), Some(INTERRUPTED_LOG));

        let untouched = repo.find_by_id(done).await.unwrap().unwrap();
        assert_eq!(untouched.status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn test_nothing_to_recover() {
        let repo = InMemoryDeploymentRepository::new();
        let service = RecoveryService::new(
            Arc::new(repo.clone()),
            Arc::new(MockTimeProvider::new(0)),
        );

        assert_eq!(service.recover_interrupted().await.unwrap(), 0);
        assert_eq!(repo.update_count(), 0);
    }
}
