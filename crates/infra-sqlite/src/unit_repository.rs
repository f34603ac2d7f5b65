// SQLite UnitRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use shiparr_core::domain::{DeployableUnit, HealthcheckSpec, ProjectId, UnitId};
use shiparr_core::error::{AppError, Result};
use shiparr_core::port::UnitRepository;
use sqlx::SqlitePool;
use tracing::warn;

pub struct SqliteUnitRepository {
    pool: SqlitePool,
}

impl SqliteUnitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Column values shared by INSERT and UPDATE
struct UnitColumns {
    depends_on: String,
    check_interval_secs: i64,
    healthcheck_url: Option<String>,
    healthcheck_timeout_secs: Option<i64>,
    healthcheck_expected_status: Option<i64>,
}

impl UnitColumns {
    fn from_unit(unit: &DeployableUnit) -> Result<Self> {
        let hc = unit.healthcheck.as_ref();
        Ok(Self {
            depends_on: serde_json::to_string(&unit.depends_on)?,
            check_interval_secs: unit.check_interval_secs as i64,
            healthcheck_url: hc.map(|h| h.url.clone()),
            healthcheck_timeout_secs: hc.map(|h| h.timeout_secs as i64),
            healthcheck_expected_status: hc.map(|h| i64::from(h.expected_status)),
        })
    }
}

#[async_trait]
impl UnitRepository for SqliteUnitRepository {
    async fn insert(&self, unit: &DeployableUnit) -> Result<UnitId> {
        let cols = UnitColumns::from_unit(unit)?;

        let result = sqlx::query(
            r#"
            INSERT INTO units (
                project_id, name, git_url, branch, path, local_path,
                auth_token, last_commit_hash, check_interval_secs, priority,
                depends_on, env_file,
                healthcheck_url, healthcheck_timeout_secs, healthcheck_expected_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(unit.project_id)
        .bind(&unit.name)
        .bind(&unit.git_url)
        .bind(&unit.branch)
        .bind(&unit.path)
        .bind(&unit.local_path)
        .bind(&unit.auth_token)
        .bind(&unit.last_commit_hash)
        .bind(cols.check_interval_secs)
        .bind(unit.priority)
        .bind(&cols.depends_on)
        .bind(&unit.env_file)
        .bind(&cols.healthcheck_url)
        .bind(cols.healthcheck_timeout_secs)
        .bind(cols.healthcheck_expected_status)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, unit: &DeployableUnit) -> Result<()> {
        let cols = UnitColumns::from_unit(unit)?;

        let result = sqlx::query(
            r#"
            UPDATE units
            SET project_id = ?, name = ?, git_url = ?, branch = ?, path = ?, local_path = ?,
                auth_token = ?, last_commit_hash = ?, check_interval_secs = ?, priority = ?,
                depends_on = ?, env_file = ?,
                healthcheck_url = ?, healthcheck_timeout_secs = ?, healthcheck_expected_status = ?
            WHERE id = ?
            "#,
        )
        .bind(unit.project_id)
        .bind(&unit.name)
        .bind(&unit.git_url)
        .bind(&unit.branch)
        .bind(&unit.path)
        .bind(&unit.local_path)
        .bind(&unit.auth_token)
        .bind(&unit.last_commit_hash)
        .bind(cols.check_interval_secs)
        .bind(unit.priority)
        .bind(&cols.depends_on)
        .bind(&unit.env_file)
        .bind(&cols.healthcheck_url)
        .bind(cols.healthcheck_timeout_secs)
        .bind(cols.healthcheck_expected_status)
        .bind(unit.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Unit {} not found", unit.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: UnitId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM units WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: UnitId) -> Result<Option<DeployableUnit>> {
        let row = sqlx::query_as::<_, UnitRow>("SELECT * FROM units WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(UnitRow::into_unit))
    }

    async fn find_by_name(
        &self,
        project_id: ProjectId,
        name: &str,
    ) -> Result<Option<DeployableUnit>> {
        let row =
            sqlx::query_as::<_, UnitRow>("SELECT * FROM units WHERE project_id = ? AND name = ?")
                .bind(project_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(row.map(UnitRow::into_unit))
    }

    async fn list_all(&self) -> Result<Vec<DeployableUnit>> {
        let rows: Vec<UnitRow> = sqlx::query_as("SELECT * FROM units ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UnitRow::into_unit).collect())
    }

    async fn list_by_project(&self, project_id: ProjectId) -> Result<Vec<DeployableUnit>> {
        let rows: Vec<UnitRow> =
            sqlx::query_as("SELECT * FROM units WHERE project_id = ? ORDER BY id ASC")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UnitRow::into_unit).collect())
    }

    async fn update_last_commit_hash(&self, id: UnitId, hash: Option<&str>) -> Result<()> {
        // Single-column write, the rest of the row belongs to the config sync
        let result = sqlx::query("UPDATE units SET last_commit_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Unit {} not found", id)));
        }
        Ok(())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct UnitRow {
    id: i64,
    project_id: i64,
    name: String,
    git_url: String,
    branch: String,
    path: String,
    local_path: String,
    auth_token: Option<String>,
    last_commit_hash: Option<String>,
    check_interval_secs: i64,
    priority: i32,
    depends_on: String,
    env_file: Option<String>,
    healthcheck_url: Option<String>,
    healthcheck_timeout_secs: Option<i64>,
    healthcheck_expected_status: Option<i64>,
}

impl UnitRow {
    fn into_unit(self) -> DeployableUnit {
        let depends_on = serde_json::from_str(&self.depends_on).unwrap_or_else(|e| {
            warn!(unit_id = self.id, error = %e, "Unreadable depends_on column, treating as empty");
            Vec::new()
        });

        let healthcheck = self.healthcheck_url.map(|url| {
            let mut spec = HealthcheckSpec::new(url);
            if let Some(timeout) = self.healthcheck_timeout_secs {
                spec = spec.with_timeout_secs(timeout.max(0) as u64);
            }
            if let Some(status) = self
                .healthcheck_expected_status
                .and_then(|s| u16::try_from(s).ok())
            {
                spec = spec.with_expected_status(status);
            }
            spec
        });

        DeployableUnit {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            git_url: self.git_url,
            branch: self.branch,
            path: self.path,
            local_path: self.local_path,
            auth_token: self.auth_token,
            last_commit_hash: self.last_commit_hash,
            check_interval_secs: self.check_interval_secs.max(0) as u64,
            priority: self.priority,
            depends_on,
            env_file: self.env_file,
            healthcheck,
        }
    }
}
