// Loads project tokens and unit notification routes into the running services

use anyhow::Result;
use shiparr_core::application::deployer::{Credentials, TokenResolver};
use shiparr_core::domain::UnitId;
use shiparr_infra_sqlite::SqliteDeliverySettings;
use shiparr_infra_system::{NotificationRoutes, ShoutrrrNotifier};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Everything the refresh loop pushes into the engine's collaborators
pub struct DeliverySync {
    pub store: SqliteDeliverySettings,
    pub tokens: Arc<TokenResolver>,
    pub notifier: Arc<ShoutrrrNotifier>,
    pub global_github_token: Option<String>,
}

impl DeliverySync {
    /// Replace credentials and per-unit routes with the stored ones
    pub async fn load(&self) -> Result<()> {
        let project_tokens = self
            .store
            .project_tokens()
            .await
            .map_err(|e| anyhow::anyhow!("Loading project tokens failed: {}", e))?;
        let rows = self
            .store
            .unit_routes()
            .await
            .map_err(|e| anyhow::anyhow!("Loading notification routes failed: {}", e))?;

        let mut routes: HashMap<UnitId, NotificationRoutes> = HashMap::new();
        for row in rows {
            routes.entry(row.unit_id).or_default().add(row.event, row.url);
        }
        debug!(
            projects_with_tokens = project_tokens.len(),
            units_with_routes = routes.len(),
            "Delivery settings loaded"
        );

        self.tokens.replace(Credentials {
            project_tokens,
            global_github_token: self.global_github_token.clone(),
        });
        self.notifier.replace_unit_routes(routes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiparr_core::domain::{DeployableUnit, DeploymentEvent};
    use shiparr_core::port::command_runner::mocks::MockCommandRunner;
    use shiparr_core::port::UnitRepository;
    use shiparr_infra_sqlite::{create_pool, run_migrations, SqliteUnitRepository};

    #[tokio::test]
    async fn test_stored_tokens_and_routes_reach_the_services() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let units = SqliteUnitRepository::new(pool.clone());
        let mut unit = DeployableUnit::new(3, "api", "https://gitlab.example.com/a/api.git", "/srv/api");
        unit.id = units.insert(&unit).await.unwrap();

        let sync = DeliverySync {
            store: SqliteDeliverySettings::new(pool),
            tokens: Arc::new(TokenResolver::default()),
            notifier: Arc::new(ShoutrrrNotifier::new(
                Arc::new(MockCommandRunner::new()),
                NotificationRoutes::all(vec!["ntfy://global".into()]),
            )),
            global_github_token: Some("gh".into()),
        };
        sync.store.set_project_token(3, "gitlab", "gl-token").await.unwrap();
        sync.store
            .add_unit_route(unit.id, DeploymentEvent::Failure, "slack://api")
            .await
            .unwrap();

        assert_eq!(sync.tokens.resolve(&unit), None);
        sync.load().await.unwrap();

        assert_eq!(sync.tokens.resolve(&unit).as_deref(), Some("gl-token"));
        assert_eq!(
            sync.notifier.destinations(unit.id, DeploymentEvent::Failure),
            vec!["slack://api".to_string(), "ntfy://global".to_string()]
        );
        assert_eq!(
            sync.notifier.destinations(unit.id, DeploymentEvent::Success),
            vec!["ntfy://global".to_string()]
        );

        // removed settings disappear on the next load, the global token stays
        sync.store.remove_project_token(3, "gitlab").await.unwrap();
        sync.store.clear_unit_routes(unit.id).await.unwrap();
        sync.load().await.unwrap();

        assert_eq!(sync.tokens.resolve(&unit), None);
        let github = DeployableUnit::new(3, "web", "https://github.com/a/web.git", "/srv/web");
        assert_eq!(sync.tokens.resolve(&github).as_deref(), Some("gh"));
        assert_eq!(
            sync.notifier.destinations(unit.id, DeploymentEvent::Failure),
            vec!["ntfy://global".to_string()]
        );
    }
}
