// Deployment Engine - per-unit reconciliation state machine

pub mod compose;
pub mod constants;
pub mod healthcheck;
pub mod token;

use constants::*;
pub use token::{Credentials, TokenResolver};

use crate::application::git_sync::GitSync;
use crate::application::project_locks::ProjectLocks;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::work_queue::DeploymentHandler;
use crate::domain::{
    DeployableUnit, DeploymentEvent, DeploymentRecord, DeploymentStatus, UnitId,
};
use crate::error::{AppError, Result};
use crate::port::{
    CommandRunner, DeploymentRepository, HttpProbe, Notifier, SecretDecryptor, TimeProvider,
    UnitRepository,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Log lines accumulated during one deployment
#[derive(Debug, Default)]
pub struct DeployLog {
    lines: Vec<String>,
}

impl DeployLog {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Subdirectory name identifying the orchestrator's own unit
    pub self_marker: String,
    /// Run `docker image prune -f` after each successful deployment
    pub prune_images: bool,
    pub bring_up_retry: RetryPolicy,
    pub healthcheck_poll_interval: Duration,
    pub healthcheck_request_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            self_marker: SELF_UNIT_MARKER.to_string(),
            prune_images: false,
            bring_up_retry: RetryPolicy::new(BRING_UP_ATTEMPTS, BRING_UP_RETRY_DELAY),
            healthcheck_poll_interval: HEALTHCHECK_POLL_INTERVAL,
            healthcheck_request_timeout: HEALTHCHECK_REQUEST_TIMEOUT,
        }
    }
}

/// Collaborators of the engine
#[derive(Clone)]
pub struct EnginePorts {
    pub units: Arc<dyn UnitRepository>,
    pub deployments: Arc<dyn DeploymentRepository>,
    pub runner: Arc<dyn CommandRunner>,
    pub probe: Arc<dyn HttpProbe>,
    pub secrets: Arc<dyn SecretDecryptor>,
    pub notifier: Arc<dyn Notifier>,
    pub time_provider: Arc<dyn TimeProvider>,
}

/// How a normal-path deployment ended when nothing failed
enum Outcome {
    /// Remote unchanged and containers running
    Unchanged,
    Deployed,
}

/// Drives one unit from "maybe stale" to "running the remote commit"
pub struct DeploymentEngine {
    ports: EnginePorts,
    git: Arc<GitSync>,
    tokens: Arc<TokenResolver>,
    locks: Arc<ProjectLocks>,
    settings: EngineSettings,
}

impl DeploymentEngine {
    /// `locks` must be the registry shared with the work queue so direct and
    /// queued deployments of one project exclude each other.
    pub fn new(
        ports: EnginePorts,
        git: Arc<GitSync>,
        tokens: Arc<TokenResolver>,
        locks: Arc<ProjectLocks>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            ports,
            git,
            tokens,
            locks,
            settings,
        }
    }

    /// Deploy a unit, serialized with every other deployment of its project
    ///
    /// # Errors
    /// - AppError::NotFound if the unit does not exist
    /// - AppError::Database if the record itself cannot be persisted
    ///
    /// Every other failure is returned as a `failed` record.
    pub async fn deploy(&self, unit_id: UnitId) -> Result<DeploymentRecord> {
        let unit = self.load(unit_id).await?;
        let _guard = self.locks.acquire(unit.project_id).await;
        self.deploy_locked(unit_id).await
    }

    /// Stop the unit's containers (best-effort)
    pub async fn down(&self, unit: &DeployableUnit) {
        let workdir = unit.workdir();
        if !dir_exists(&workdir).await {
            warn!(unit_id = unit.id, workdir = %workdir.display(), "Nothing to stop, workdir missing");
            return;
        }

        info!(unit_id = unit.id, project = %unit.compose_project_name(), "Stopping containers");
        match self.ports.runner.run(&compose::down(unit)).await {
            Ok(output) if output.success() => {
                info!(unit_id = unit.id, "Containers stopped");
            }
            Ok(output) if compose::is_network_in_use(&output.stderr) => {
                warn!(
                    unit_id = unit.id,
                    stderr = %output.stderr.trim(),
                    "Network still in use, it will be reclaimed on next bring-up"
                );
            }
            Ok(output) => {
                error!(
                    unit_id = unit.id,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "docker compose down failed"
                );
            }
            Err(e) => error!(unit_id = unit.id, error = %e, "docker compose down failed"),
        }
    }

    async fn load(&self, unit_id: UnitId) -> Result<DeployableUnit> {
        self.ports
            .units
            .find_by_id(unit_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("unit {}", unit_id)))
    }

    /// Body of `deploy`; the caller holds the project lock
    async fn deploy_locked(&self, unit_id: UnitId) -> Result<DeploymentRecord> {
        let unit = self.load(unit_id).await?;
        let token = self.tokens.resolve(&unit);

        if unit.is_self_unit(&self.settings.self_marker) {
            return self.self_update(&unit, token.as_deref()).await;
        }

        let now = self.ports.time_provider.now_millis();
        let mut record = DeploymentRecord::start(
            unit.id,
            unit.last_commit_hash.clone().unwrap_or_default(),
            now,
        );
        record.id = self.ports.deployments.insert(&record).await?;
        info!(unit_id = unit.id, deployment_id = record.id, "Deployment started");

        let mut log = DeployLog::default();
        let outcome = self
            .reconcile(&unit, token.as_deref(), &mut record, &mut log)
            .await;
        let now = self.ports.time_provider.now_millis();

        match outcome {
            Ok(Outcome::Unchanged) => {
                record.succeed(NO_CHANGES_LOG, now)?;
                self.save_final(&record).await;
                info!(unit_id = unit.id, deployment_id = record.id, "No changes, services running");
            }
            Ok(Outcome::Deployed) => {
                record.succeed(log.render(), now)?;
                self.save_final(&record).await;
                info!(
                    unit_id = unit.id,
                    deployment_id = record.id,
                    commit = %record.commit_hash,
                    "Deployment succeeded"
                );
                self.ports
                    .notifier
                    .notify(DeploymentEvent::Success, &record)
                    .await;
                if self.settings.prune_images {
                    self.prune_images().await;
                }
            }
            Err(e) => {
                error!(unit_id = unit.id, deployment_id = record.id, error = %e, "Deployment failed");
                log.push(format!("Deployment failed: {}", e));
                record.fail(log.render(), now)?;
                self.save_final(&record).await;
                self.ports
                    .notifier
                    .notify(DeploymentEvent::Failure, &record)
                    .await;
            }
        }

        Ok(record)
    }

    /// Persist a finished record; a failed write leaves it `pending` in the
    /// store for startup recovery, and the outcome is still notified and returned
    async fn save_final(&self, record: &DeploymentRecord) {
        if let Err(e) = self.ports.deployments.update(record).await {
            error!(
                unit_id = record.unit_id,
                deployment_id = record.id,
                status = %record.status,
                error = %e,
                "Failed to store deployment outcome"
            );
        }
    }

    /// Change detection, sync, secrets, bring-up and healthcheck
    async fn reconcile(
        &self,
        unit: &DeployableUnit,
        token: Option<&str>,
        record: &mut DeploymentRecord,
        log: &mut DeployLog,
    ) -> Result<Outcome> {
        if let Some(prior) = unit.last_commit_hash.as_deref() {
            if is_git_checkout(unit.working_copy()).await {
                let remote = self
                    .git
                    .get_remote_hash(unit.working_copy(), &unit.branch, Some(&unit.git_url), token)
                    .await?;
                record.commit_hash = remote.clone();

                if remote == prior {
                    if self.containers_running(unit).await {
                        return Ok(Outcome::Unchanged);
                    }
                    log.push("No changes but services are not running, forcing restart");
                } else {
                    log.push(format!("New commit detected: {} -> {}", prior, remote));
                }
            } else {
                warn!(
                    unit_id = unit.id,
                    local_path = %unit.local_path,
                    "Working copy missing, cloning again"
                );
                log.push(format!("Working copy {} missing, cloning again", unit.local_path));
            }
        }

        let hash = self.materialize(unit, token, log).await?;
        record.commit_hash = hash.clone();
        self.ports
            .units
            .update_last_commit_hash(unit.id, Some(&hash))
            .await?;

        self.apply_secrets(unit, log).await?;
        self.bring_up(unit, log).await?;

        if let Some(healthcheck) = &unit.healthcheck {
            healthcheck::wait_until_healthy(
                self.ports.probe.as_ref(),
                healthcheck,
                self.settings.healthcheck_poll_interval,
                self.settings.healthcheck_request_timeout,
                log,
            )
            .await?;
        }

        Ok(Outcome::Deployed)
    }

    /// Clone into a missing or empty working copy, hard-reset otherwise
    async fn materialize(
        &self,
        unit: &DeployableUnit,
        token: Option<&str>,
        log: &mut DeployLog,
    ) -> Result<String> {
        let copy = unit.working_copy();
        let hash = if is_missing_or_empty(copy).await {
            log.push(format!("Cloning {} (branch {})", unit.git_url, unit.branch));
            self.git
                .clone_repo(&unit.git_url, &unit.branch, copy, token)
                .await?
        } else {
            log.push(format!("Resetting working copy to origin/{}", unit.branch));
            self.git
                .pull(copy, &unit.branch, Some(&unit.git_url), token)
                .await?
        };
        log.push(format!("Working copy at {}", hash));
        Ok(hash)
    }

    async fn apply_secrets(&self, unit: &DeployableUnit, log: &mut DeployLog) -> Result<()> {
        let Some(env_file) = unit.env_file.as_deref() else {
            return Ok(());
        };
        let workdir = unit.workdir();
        self.ports
            .secrets
            .decrypt_to(&workdir.join(env_file), &workdir.join(PLAINTEXT_ENV_FILE))
            .await?;
        log.push(format!("Decrypted {} into {}", env_file, PLAINTEXT_ENV_FILE));
        Ok(())
    }

    /// `docker compose up -d` with bounded retries
    async fn bring_up(&self, unit: &DeployableUnit, log: &mut DeployLog) -> Result<()> {
        let workdir = unit.workdir();
        let compose_file = compose::detect_compose_file(&workdir).await;
        let spec = compose::up(unit, compose_file);
        let policy = self.settings.bring_up_retry;

        let mut attempt = 1;
        loop {
            let failure = match self.ports.runner.run(&spec).await {
                Ok(output) => {
                    log.push(format!("Attempt {} stdout: {}", attempt, output.stdout.trim_end()));
                    log.push(format!("Attempt {} stderr: {}", attempt, output.stderr.trim_end()));
                    if output.success() {
                        return Ok(());
                    }
                    format!("exit code {:?}", output.exit_code)
                }
                Err(e) => {
                    log.push(format!("Attempt {} error: {}", attempt, e));
                    e.to_string()
                }
            };

            match policy.decide(attempt) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        unit_id = unit.id,
                        attempt = attempt,
                        failure = %failure,
                        "docker compose up failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    return Err(AppError::BringUp(format!(
                        "docker compose up failed after {} attempts ({})",
                        attempt, failure
                    )));
                }
            }
        }
    }

    async fn containers_running(&self, unit: &DeployableUnit) -> bool {
        if !dir_exists(&unit.workdir()).await {
            return false;
        }
        match self.ports.runner.run(&compose::running_containers(unit)).await {
            Ok(output) if output.success() => !output.stdout.trim().is_empty(),
            Ok(output) => {
                warn!(unit_id = unit.id, stderr = %output.stderr.trim(), "docker compose ps failed");
                false
            }
            Err(e) => {
                warn!(unit_id = unit.id, error = %e, "docker compose ps failed");
                false
            }
        }
    }

    async fn prune_images(&self) {
        match self.ports.runner.run(&compose::prune_images()).await {
            Ok(output) if output.success() => info!("Unused images pruned"),
            Ok(output) => warn!(stderr = %output.stderr.trim(), "docker image prune failed"),
            Err(e) => warn!(error = %e, "docker image prune failed"),
        }
    }

    /// Record-then-act path for the orchestrator's own unit
    ///
    /// The new hash and a `success` record are written before compose
    /// restarts the stack, because that restart may kill this process.
    async fn self_update(
        &self,
        unit: &DeployableUnit,
        token: Option<&str>,
    ) -> Result<DeploymentRecord> {
        warn!(unit_id = unit.id, path = %unit.path, "Self-deployment detected, starting self-update");

        let mut commit = unit.last_commit_hash.clone().unwrap_or_default();
        if unit.last_commit_hash.is_some() {
            let remote = self
                .git
                .get_remote_hash(unit.working_copy(), &unit.branch, Some(&unit.git_url), token)
                .await;
            match remote {
                Ok(remote) => {
                    self.ports
                        .units
                        .update_last_commit_hash(unit.id, Some(&remote))
                        .await?;
                    commit = remote;
                }
                Err(e) => return self.record_failure(unit, commit, e.into()).await,
            }
        }

        let now = self.ports.time_provider.now_millis();
        let mut record = DeploymentRecord::completed(
            unit.id,
            commit,
            DeploymentStatus::Success,
            SELF_UPDATE_LOG,
            now,
        );
        record.id = self.ports.deployments.insert(&record).await?;

        let mut log = DeployLog::default();
        if let Err(e) = self.materialize(unit, token, &mut log).await {
            error!(unit_id = unit.id, error = %e, "Self-update sync failed");
            return Ok(record);
        }

        let compose_file = compose::detect_compose_file(&unit.workdir()).await;
        info!(unit_id = unit.id, "Running docker compose up for self-update, this process may stop");
        match self.ports.runner.run(&compose::up(unit, compose_file)).await {
            Ok(output) if output.success() => info!(unit_id = unit.id, "Self-update bring-up finished"),
            Ok(output) => error!(
                unit_id = unit.id,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "Self-update docker compose failed"
            ),
            Err(e) => error!(unit_id = unit.id, error = %e, "Self-update docker compose failed"),
        }

        Ok(record)
    }

    async fn record_failure(
        &self,
        unit: &DeployableUnit,
        commit: String,
        err: AppError,
    ) -> Result<DeploymentRecord> {
        error!(unit_id = unit.id, error = %err, "Deployment failed");
        let now = self.ports.time_provider.now_millis();
        let mut record = DeploymentRecord::completed(
            unit.id,
            commit,
            DeploymentStatus::Failed,
            format!("Deployment failed: {}", err),
            now,
        );
        record.id = self.ports.deployments.insert(&record).await?;
        self.ports
            .notifier
            .notify(DeploymentEvent::Failure, &record)
            .await;
        Ok(record)
    }
}

#[async_trait]
impl DeploymentHandler for DeploymentEngine {
    async fn handle(&self, unit_id: UnitId) -> Result<DeploymentRecord> {
        self.deploy_locked(unit_id).await
    }
}

async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_git_checkout(path: &Path) -> bool {
    dir_exists(&path.join(".git")).await
}

async fn is_missing_or_empty(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => true,
    }
}
