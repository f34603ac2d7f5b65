//! Deployment engine against a real git remote and SQLite
//!
//! Docker is scripted; every git operation runs the host binary.

mod common;

use common::{git_available, GitRemote, Stack, SEED_COMPOSE};
use std::sync::Arc;
use std::time::Duration;

use shiparr_core::application::{GitSync, RetryPolicy};
use shiparr_core::domain::{DeployableUnit, DeploymentEvent, DeploymentStatus, HealthcheckSpec};
use shiparr_core::port::command_runner::mocks::MockReply;
use shiparr_core::port::http_probe::mocks::MockHttpProbe;
use shiparr_core::port::DeploymentRepository;
use shiparr_infra_system::TokioCommandRunner;

const UP: &str = "docker compose -f docker-compose.yml up -d";
const PS: &str = "docker compose ps";

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("git not installed, skipping");
            return;
        }
    };
}

async fn web_unit(stack: &Stack, remote: &GitRemote) -> DeployableUnit {
    stack
        .add_unit(DeployableUnit::new(
            1,
            "web",
            remote.url(),
            stack.checkout_path("web").to_string_lossy(),
        ))
        .await
}

#[tokio::test]
async fn test_first_deploy_clones_and_brings_up() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(200)).await;
    let unit = web_unit(&stack, &remote).await;

    let record = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.commit_hash, remote.head());
    assert_eq!(stack.stored_hash(&unit).await, Some(remote.head()));
    assert!(stack.checkout_path("web").join("docker-compose.yml").exists());

    let up_calls: Vec<_> = stack
        .docker
        .calls()
        .into_iter()
        .filter(|c| c.command_line() == UP)
        .collect();
    assert_eq!(up_calls.len(), 1);
    let project = format!("shiparr_repo_{}", unit.id);
    assert_eq!(
        up_calls[0].env.get("COMPOSE_PROJECT_NAME"),
        Some(&project)
    );

    let latest = stack.deployments.latest_for_unit(unit.id).await.unwrap().unwrap();
    assert_eq!(latest, record);
    assert_eq!(stack.notifier.kinds(), vec![DeploymentEvent::Success]);
}

#[tokio::test]
async fn test_unchanged_remote_with_running_containers_is_noop() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(200)).await;
    let unit = web_unit(&stack, &remote).await;
    stack.engine.deploy(unit.id).await.unwrap();

    stack.docker.on(PS, MockReply::ok("4be1c2\n"));
    let second = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(second.status, DeploymentStatus::Success);
    assert_eq!(second.logs.as_deref(), Some("No changes, services running"));
    assert_eq!(second.commit_hash, remote.head());
    assert_eq!(stack.docker.count_matching(UP), 1);
    assert_eq!(
        stack.deployments.history_for_unit(unit.id, 10).await.unwrap().len(),
        2
    );
    // only the real deployment notifies
    assert_eq!(stack.notifier.kinds(), vec![DeploymentEvent::Success]);
}

#[tokio::test]
async fn test_new_commit_redeploys_and_discards_local_drift() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(200)).await;
    let unit = web_unit(&stack, &remote).await;
    let first = stack.engine.deploy(unit.id).await.unwrap();

    let copy = stack.checkout_path("web");
    std::fs::write(copy.join("docker-compose.yml"), "services: {}\n").unwrap();
    std::fs::write(copy.join("scratch.txt"), "local only").unwrap();
    let pushed = remote.commit("app.env", "VERSION=2\n");
    stack.docker.on(PS, MockReply::ok("4be1c2\n"));

    let record = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Success);
    assert_eq!(record.commit_hash, pushed);
    assert_ne!(record.commit_hash, first.commit_hash);
    assert!(record
        .logs
        .as_deref()
        .unwrap()
        .contains(&format!("New commit detected: {} -> {}", first.commit_hash, pushed)));
    assert_eq!(stack.stored_hash(&unit).await, Some(pushed));

    assert_eq!(
        std::fs::read_to_string(copy.join("docker-compose.yml")).unwrap(),
        SEED_COMPOSE
    );
    assert!(!copy.join("scratch.txt").exists());
    assert!(copy.join("app.env").exists());
    assert_eq!(stack.docker.count_matching(UP), 2);
}

#[tokio::test]
async fn test_failed_healthcheck_fails_but_keeps_synced_hash() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(503)).await;
    let unit = stack
        .add_unit(
            DeployableUnit::new(
                1,
                "web",
                remote.url(),
                stack.checkout_path("web").to_string_lossy(),
            )
            .with_healthcheck(HealthcheckSpec::new("http://web.local/health").with_timeout_secs(1)),
        )
        .await;

    let record = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Failed);
    let logs = record.logs.as_deref().unwrap();
    assert!(logs.contains("Healthcheck failed"));
    assert!(logs.contains("did not return 200 within 1s"));
    // the working copy moved, so the hash is recorded even though the gate failed
    assert_eq!(stack.stored_hash(&unit).await, Some(remote.head()));
    assert_eq!(stack.notifier.kinds(), vec![DeploymentEvent::Failure]);
}

#[tokio::test]
async fn test_missing_working_copy_is_cloned_again() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(200)).await;
    let unit = web_unit(&stack, &remote).await;
    stack.engine.deploy(unit.id).await.unwrap();

    std::fs::remove_dir_all(stack.checkout_path("web")).unwrap();
    let record = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Success);
    assert!(record.logs.as_deref().unwrap().contains("missing, cloning again"));
    assert!(stack.checkout_path("web").join(".git").exists());
    assert_eq!(stack.docker.count_matching(UP), 2);
}

#[tokio::test]
async fn test_unknown_branch_is_recorded_as_failure() {
    require_git!();
    let remote = GitRemote::new();
    let stack = Stack::with_host_git(MockHttpProbe::always(200)).await;
    let unit = stack
        .add_unit(
            DeployableUnit::new(
                1,
                "web",
                remote.url(),
                stack.checkout_path("web").to_string_lossy(),
            )
            .with_branch("release"),
        )
        .await;

    let record = stack.engine.deploy(unit.id).await.unwrap();

    assert_eq!(record.status, DeploymentStatus::Failed);
    assert!(record.logs.as_deref().unwrap().contains("Deployment failed"));
    assert_eq!(stack.stored_hash(&unit).await, None);
    assert_eq!(stack.docker.count_matching(UP), 0);
}

#[tokio::test]
async fn test_git_sync_pull_is_idempotent_and_tracks_remote() {
    require_git!();
    let remote = GitRemote::new();
    let workspace = tempfile::tempdir().unwrap();
    let copy = workspace.path().join("copy");
    let git = GitSync::new(Arc::new(TokioCommandRunner::new()))
        .with_fetch_retry(RetryPolicy::new(1, Duration::from_millis(1)))
        .with_cache_ttl(Duration::ZERO);

    let cloned = git.clone_repo(&remote.url(), "main", &copy, None).await.unwrap();
    assert_eq!(cloned, remote.head());
    assert!(!git.has_changes(&copy, "main", None, None).await.unwrap());

    let pushed = remote.commit("docs/readme.md", "# hi\n");
    assert!(git.has_changes(&copy, "main", None, None).await.unwrap());
    assert_eq!(
        git.get_remote_hash(&copy, "main", None, None).await.unwrap(),
        pushed
    );

    std::fs::write(copy.join("untracked.log"), "x").unwrap();
    let first = git.pull(&copy, "main", None, None).await.unwrap();
    let second = git.pull(&copy, "main", None, None).await.unwrap();

    assert_eq!(first, pushed);
    assert_eq!(second, pushed);
    assert_eq!(git.get_local_hash(&copy).await.unwrap(), pushed);
    assert!(!copy.join("untracked.log").exists());
}
