//! Shared fixtures: SQLite-backed engine, local git remotes, scripted docker
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use shiparr_core::application::deployer::TokenResolver;
use shiparr_core::application::{
    DeploymentEngine, EnginePorts, EngineSettings, GitSync, ProjectLocks, RetryPolicy,
};
use shiparr_core::domain::{DeployableUnit, ProjectId};
use shiparr_core::port::command_runner::mocks::MockCommandRunner;
use shiparr_core::port::http_probe::mocks::MockHttpProbe;
use shiparr_core::port::notifier::mocks::RecordingNotifier;
use shiparr_core::port::secret_decryptor::mocks::MockSecretDecryptor;
use shiparr_core::port::time_provider::SystemTimeProvider;
use shiparr_core::port::{
    CommandOutput, CommandRunner, CommandSpec, ExecutionError, UnitRepository,
};
use shiparr_infra_sqlite::{
    create_pool, run_migrations, SqliteDeploymentRepository, SqliteUnitRepository,
};
use shiparr_infra_system::TokioCommandRunner;

pub const SEED_COMPOSE: &str = "services:\n  web:\n    image: nginx:alpine\n";

/// Real `git`, scripted everything else (docker, sops, shoutrrr)
pub struct HostGitRunner {
    git: TokioCommandRunner,
    scripted: MockCommandRunner,
}

#[async_trait]
impl CommandRunner for HostGitRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecutionError> {
        if spec.program == "git" {
            self.git.run(spec).await
        } else {
            self.scripted.run(spec).await
        }
    }
}

/// Engine over an in-memory SQLite database
pub struct Stack {
    pub engine: Arc<DeploymentEngine>,
    pub units: Arc<SqliteUnitRepository>,
    pub deployments: Arc<SqliteDeploymentRepository>,
    /// Sees every non-git command, and git too unless real git is used
    pub docker: MockCommandRunner,
    pub notifier: RecordingNotifier,
    pub locks: Arc<ProjectLocks>,
    pub workspace: TempDir,
}

impl Stack {
    /// Scripted git: pair with `fake_checkout`
    pub async fn scripted(probe: MockHttpProbe) -> Self {
        Self::build(probe, false).await
    }

    /// Host git: pair with `GitRemote`
    pub async fn with_host_git(probe: MockHttpProbe) -> Self {
        Self::build(probe, true).await
    }

    async fn build(probe: MockHttpProbe, host_git: bool) -> Self {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let units = Arc::new(SqliteUnitRepository::new(pool.clone()));
        let deployments = Arc::new(SqliteDeploymentRepository::new(pool));
        let docker = MockCommandRunner::new();
        let notifier = RecordingNotifier::new();
        let locks = Arc::new(ProjectLocks::new());

        let runner: Arc<dyn CommandRunner> = if host_git {
            Arc::new(HostGitRunner {
                git: TokioCommandRunner::new(),
                scripted: docker.clone(),
            })
        } else {
            Arc::new(docker.clone())
        };

        let ports = EnginePorts {
            units: units.clone(),
            deployments: deployments.clone(),
            runner: runner.clone(),
            probe: Arc::new(probe),
            secrets: Arc::new(MockSecretDecryptor::new()),
            notifier: Arc::new(notifier.clone()),
            time_provider: Arc::new(SystemTimeProvider),
        };
        let git = GitSync::new(runner)
            .with_fetch_retry(RetryPolicy::new(1, Duration::from_millis(1)))
            .with_cache_ttl(Duration::ZERO);
        let settings = EngineSettings {
            bring_up_retry: RetryPolicy::new(2, Duration::from_millis(5)),
            healthcheck_poll_interval: Duration::from_millis(20),
            healthcheck_request_timeout: Duration::from_millis(200),
            ..EngineSettings::default()
        };

        let engine = Arc::new(DeploymentEngine::new(
            ports,
            Arc::new(git),
            Arc::new(TokenResolver::default()),
            locks.clone(),
            settings,
        ));

        Self {
            engine,
            units,
            deployments,
            docker,
            notifier,
            locks,
            workspace: tempfile::tempdir().unwrap(),
        }
    }

    /// Where a unit's working copy lives inside the workspace
    pub fn checkout_path(&self, name: &str) -> PathBuf {
        self.workspace.path().join("checkouts").join(name)
    }

    /// Persist a unit and return it with its assigned id
    pub async fn add_unit(&self, mut unit: DeployableUnit) -> DeployableUnit {
        unit.id = self.units.insert(&unit).await.unwrap();
        unit
    }

    /// Unit whose working copy already looks like a git checkout
    pub async fn fake_checkout(
        &self,
        project_id: ProjectId,
        name: &str,
        configure: impl FnOnce(DeployableUnit) -> DeployableUnit,
    ) -> DeployableUnit {
        let copy = self.checkout_path(&format!("{}-{}", project_id, name));
        std::fs::create_dir_all(copy.join(".git")).unwrap();
        std::fs::write(copy.join("docker-compose.yml"), SEED_COMPOSE).unwrap();

        let unit = DeployableUnit::new(
            project_id,
            name,
            format!("https://git.example.com/acme/{}.git", name),
            copy.to_string_lossy(),
        );
        self.add_unit(configure(unit)).await
    }

    pub async fn stored_hash(&self, unit: &DeployableUnit) -> Option<String> {
        self.units
            .find_by_id(unit.id)
            .await
            .unwrap()
            .and_then(|u| u.last_commit_hash)
    }
}

/// A bare repository fed from a seed working tree
pub struct GitRemote {
    dir: TempDir,
    seed: PathBuf,
    bare: PathBuf,
}

impl GitRemote {
    /// Remote whose `main` holds a single commit with a compose file
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("seed");
        let bare = dir.path().join("origin.git");
        std::fs::create_dir_all(&seed).unwrap();

        git(&seed, &["init", "-q"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(seed.join("docker-compose.yml"), SEED_COMPOSE).unwrap();
        commit_all(&seed, "initial");

        git(
            dir.path(),
            &["clone", "-q", "--bare", &seed.to_string_lossy(), &bare.to_string_lossy()],
        );
        git(&seed, &["remote", "add", "origin", &bare.to_string_lossy()]);

        Self { dir, seed, bare }
    }

    pub fn url(&self) -> String {
        self.bare.to_string_lossy().into_owned()
    }

    /// Commit one file on `main`, push it and return the new head
    pub fn commit(&self, file: &str, content: &str) -> String {
        let path = self.seed.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        commit_all(&self.seed, &format!("update {}", file));
        git(&self.seed, &["push", "-q", "origin", "main"]);
        self.head()
    }

    pub fn head(&self) -> String {
        git(&self.seed, &["rev-parse", "HEAD"])
    }
}

/// Tests touching a real git binary return early when it is absent
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(
        dir,
        &[
            "-c",
            "user.name=Shiparr Test",
            "-c",
            "user.email=test@shiparr.local",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "-q",
            "-m",
            message,
        ],
    );
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}
