// Deployable Unit Domain Model

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unit identifier (database row id)
pub type UnitId = i64;

/// Project identifier (database row id)
pub type ProjectId = i64;

/// Fixed prefix of the compose project name (`<prefix>_repo_<unit-id>`).
/// Containers are discovered through the `com.docker.compose.project` label,
/// so this value must never change.
pub const COMPOSE_PROJECT_PREFIX: &str = "shiparr";

/// Optional HTTP health gate run after bring-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub url: String,
    pub timeout_secs: u64,
    pub expected_status: u16,
}

impl HealthcheckSpec {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
            expected_status: Self::DEFAULT_EXPECTED_STATUS,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }
}

/// A git-backed compose stack kept in sync with its remote
///
/// Owned by the configuration-sync collaborator. The deployment engine only
/// ever writes `last_commit_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployableUnit {
    pub id: UnitId,
    pub project_id: ProjectId,
    pub name: String,
    pub git_url: String,
    pub branch: String,
    /// Subdirectory of the working copy holding the compose file
    pub path: String,
    /// Working copy location on disk
    pub local_path: String,
    pub auth_token: Option<String>,
    pub last_commit_hash: Option<String>,
    pub check_interval_secs: u64,
    pub priority: i32,
    /// Names of other units in the same project that must be deployed first
    pub depends_on: Vec<String>,
    /// Encrypted env file, relative to the unit's working directory
    pub env_file: Option<String>,
    pub healthcheck: Option<HealthcheckSpec>,
}

impl DeployableUnit {
    pub const DEFAULT_BRANCH: &'static str = "main";
    pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

    /// Create an unsaved unit (id 0) with defaults for the optional fields
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        git_url: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            project_id,
            name: name.into(),
            git_url: git_url.into(),
            branch: Self::DEFAULT_BRANCH.to_string(),
            path: "./".to_string(),
            local_path: local_path.into(),
            auth_token: None,
            last_commit_hash: None,
            check_interval_secs: Self::DEFAULT_CHECK_INTERVAL_SECS,
            priority: 0,
            depends_on: Vec::new(),
            env_file: None,
            healthcheck: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_healthcheck(mut self, healthcheck: HealthcheckSpec) -> Self {
        self.healthcheck = Some(healthcheck);
        self
    }

    pub fn with_env_file(mut self, env_file: impl Into<String>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn working_copy(&self) -> &Path {
        Path::new(&self.local_path)
    }

    /// Directory the compose commands run in
    pub fn workdir(&self) -> PathBuf {
        let sub = self.path.trim_start_matches("./");
        if sub.is_empty() || sub == "." {
            self.working_copy().to_path_buf()
        } else {
            self.working_copy().join(sub)
        }
    }

    /// `COMPOSE_PROJECT_NAME` for every compose invocation of this unit
    pub fn compose_project_name(&self) -> String {
        format!("{}_repo_{}", COMPOSE_PROJECT_PREFIX, self.id)
    }

    /// True when the unit's subdirectory name equals the orchestrator's own marker
    pub fn is_self_unit(&self, marker: &str) -> bool {
        Path::new(&self.path)
            .file_name()
            .map(|name| name == marker)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> DeployableUnit {
        DeployableUnit::new(1, "web", "https://github.com/acme/web.git", "/srv/web")
    }

    #[test]
    fn test_compose_project_name() {
        let mut u = unit();
        u.id = 42;
        assert_eq!(u.compose_project_name(), "shiparr_repo_42");
    }

    #[test]
    fn test_workdir_root_and_subdirectory() {
        assert_eq!(unit().workdir(), PathBuf::from("/srv/web"));
        assert_eq!(
            unit().with_path("./deploy/prod").workdir(),
            PathBuf::from("/srv/web/deploy/prod")
        );
        assert_eq!(
            unit().with_path("stack").workdir(),
            PathBuf::from("/srv/web/stack")
        );
    }

    #[test]
    fn test_self_unit_detection_uses_last_component() {
        assert!(unit().with_path("./infra/Shiparr").is_self_unit("Shiparr"));
        assert!(unit().with_path("Shiparr").is_self_unit("Shiparr"));
        assert!(!unit().with_path("./Shiparr-extra").is_self_unit("Shiparr"));
        assert!(!unit().is_self_unit("Shiparr"));
    }

    #[test]
    fn test_healthcheck_defaults() {
        let hc = HealthcheckSpec::new("http://localhost:8080/health");
        assert_eq!(hc.timeout_secs, 60);
        assert_eq!(hc.expected_status, 200);
    }
}
