// SQLite store of project tokens and per-unit notification routes

use crate::error::map_sqlx_error;
use shiparr_core::domain::{DeploymentEvent, ProjectId, UnitId};
use shiparr_core::error::Result;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// One notification destination of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRoute {
    pub unit_id: UnitId,
    pub event: DeploymentEvent,
    pub url: String,
}

/// Written by the configuration sync, read by the daemon on every unit refresh
pub struct SqliteDeliverySettings {
    pool: SqlitePool,
}

impl SqliteDeliverySettings {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite one named token of a project
    pub async fn set_project_token(
        &self,
        project_id: ProjectId,
        name: &str,
        token: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_tokens (project_id, name, token) VALUES (?, ?, ?)
            ON CONFLICT (project_id, name) DO UPDATE SET token = excluded.token
            "#,
        )
        .bind(project_id)
        .bind(name)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn remove_project_token(&self, project_id: ProjectId, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM project_tokens WHERE project_id = ? AND name = ?")
            .bind(project_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Token maps of every project
    pub async fn project_tokens(&self) -> Result<HashMap<ProjectId, BTreeMap<String, String>>> {
        let rows: Vec<(i64, String, String)> =
            sqlx::query_as("SELECT project_id, name, token FROM project_tokens")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut tokens: HashMap<ProjectId, BTreeMap<String, String>> = HashMap::new();
        for (project_id, name, token) in rows {
            tokens.entry(project_id).or_default().insert(name, token);
        }
        Ok(tokens)
    }

    /// Adding a route twice is a no-op
    pub async fn add_unit_route(
        &self,
        unit_id: UnitId,
        event: DeploymentEvent,
        url: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO unit_notification_routes (unit_id, event, url) VALUES (?, ?, ?)",
        )
        .bind(unit_id)
        .bind(event.as_str())
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Drop every route of a unit, returns how many were removed
    pub async fn clear_unit_routes(&self, unit_id: UnitId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM unit_notification_routes WHERE unit_id = ?")
            .bind(unit_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    /// Routes of every unit, in insertion order per unit
    pub async fn unit_routes(&self) -> Result<Vec<UnitRoute>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT unit_id, event, url FROM unit_notification_routes ORDER BY unit_id, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|(unit_id, event, url)| {
                let event = match event.as_str() {
                    "success" => DeploymentEvent::Success,
                    "failure" => DeploymentEvent::Failure,
                    other => {
                        warn!(unit_id = unit_id, event = %other, "Ignoring route with unknown event");
                        return None;
                    }
                };
                Some(UnitRoute { unit_id, event, url })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteUnitRepository};
    use shiparr_core::domain::DeployableUnit;
    use shiparr_core::port::UnitRepository;

    async fn setup() -> (SqlitePool, SqliteDeliverySettings) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        (pool.clone(), SqliteDeliverySettings::new(pool))
    }

    #[tokio::test]
    async fn test_project_tokens_group_by_project_and_overwrite() {
        let (_, settings) = setup().await;
        settings.set_project_token(1, "github", "old").await.unwrap();
        settings.set_project_token(1, "github", "new").await.unwrap();
        settings.set_project_token(1, "default", "d").await.unwrap();
        settings.set_project_token(2, "gitlab", "gl").await.unwrap();

        let tokens = settings.project_tokens().await.unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[&1].get("github").map(String::as_str), Some("new"));
        assert_eq!(tokens[&1].get("default").map(String::as_str), Some("d"));
        assert_eq!(tokens[&2].len(), 1);

        assert!(settings.remove_project_token(2, "gitlab").await.unwrap());
        assert!(!settings.remove_project_token(2, "gitlab").await.unwrap());
        assert!(!settings.project_tokens().await.unwrap().contains_key(&2));
    }

    #[tokio::test]
    async fn test_unit_routes_follow_the_unit() {
        let (pool, settings) = setup().await;
        let units = SqliteUnitRepository::new(pool);
        let unit_id = units
            .insert(&DeployableUnit::new(1, "web", "https://example.com/web.git", "/srv/web"))
            .await
            .unwrap();

        settings
            .add_unit_route(unit_id, DeploymentEvent::Failure, "slack://a")
            .await
            .unwrap();
        settings
            .add_unit_route(unit_id, DeploymentEvent::Failure, "slack://a")
            .await
            .unwrap();
        settings
            .add_unit_route(unit_id, DeploymentEvent::Success, "discord://b")
            .await
            .unwrap();

        let routes = settings.unit_routes().await.unwrap();
        assert_eq!(
            routes,
            vec![
                UnitRoute {
                    unit_id,
                    event: DeploymentEvent::Failure,
                    url: "slack://a".to_string(),
                },
                UnitRoute {
                    unit_id,
                    event: DeploymentEvent::Success,
                    url: "discord://b".to_string(),
                },
            ]
        );

        // deleting the unit cascades to its routes
        units.delete(unit_id).await.unwrap();
        assert!(settings.unit_routes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_for_unknown_unit_is_rejected() {
        let (_, settings) = setup().await;
        assert!(settings
            .add_unit_route(42, DeploymentEvent::Success, "slack://a")
            .await
            .is_err());
        assert_eq!(settings.clear_unit_routes(42).await.unwrap(), 0);
    }
}
