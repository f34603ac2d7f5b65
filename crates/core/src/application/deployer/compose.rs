// docker compose command builders

use crate::domain::DeployableUnit;
use crate::port::CommandSpec;
use std::path::Path;

/// Compose file names, in lookup order
pub const COMPOSE_FILE_CANDIDATES: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

/// First candidate present in `workdir`, `docker-compose.yml` when none is
pub async fn detect_compose_file(workdir: &Path) -> &'static str {
    for candidate in COMPOSE_FILE_CANDIDATES {
        if let Ok(true) = tokio::fs::try_exists(workdir.join(candidate)).await {
            return candidate;
        }
    }
    COMPOSE_FILE_CANDIDATES[0]
}

fn compose(unit: &DeployableUnit) -> CommandSpec {
    CommandSpec::new("docker")
        .arg("compose")
        .current_dir(unit.workdir())
        .env("COMPOSE_PROJECT_NAME", unit.compose_project_name())
}

/// `docker compose -f <file> up -d`
pub fn up(unit: &DeployableUnit, compose_file: &str) -> CommandSpec {
    compose(unit).args(["-f", compose_file, "up", "-d"])
}

/// `docker compose down`
pub fn down(unit: &DeployableUnit) -> CommandSpec {
    compose(unit).arg("down")
}

/// Lists ids of running containers; empty stdout means nothing runs
pub fn running_containers(unit: &DeployableUnit) -> CommandSpec {
    compose(unit).args(["ps", "--filter", "status=running", "-q"])
}

/// `docker image prune -f`
pub fn prune_images() -> CommandSpec {
    CommandSpec::new("docker").args(["image", "prune", "-f"])
}

/// Compose refuses to remove a network another stack still uses; the next
/// bring-up reclaims it, so this is not an error.
pub fn is_network_in_use(stderr: &str) -> bool {
    stderr.contains("network") && stderr.contains("is still used by")
}
