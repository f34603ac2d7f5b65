// SQLite DeploymentRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use shiparr_core::domain::{DeploymentId, DeploymentRecord, DeploymentStatus, UnitId};
use shiparr_core::error::{AppError, Result};
use shiparr_core::port::DeploymentRepository;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::warn;

pub struct SqliteDeploymentRepository {
    pool: SqlitePool,
}

impl SqliteDeploymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepository for SqliteDeploymentRepository {
    async fn insert(&self, record: &DeploymentRecord) -> Result<DeploymentId> {
        let result = sqlx::query(
            r#"
            INSERT INTO deployments (unit_id, commit_hash, status, started_at, finished_at, logs)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.unit_id)
        .bind(&record.commit_hash)
        .bind(record.status.as_str())
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(&record.logs)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, record: &DeploymentRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET commit_hash = ?, status = ?, finished_at = ?, logs = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.commit_hash)
        .bind(record.status.as_str())
        .bind(record.finished_at)
        .bind(&record.logs)
        .bind(record.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Deployment {} not found", record.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: DeploymentId) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(DeploymentRow::into_record))
    }

    async fn latest_for_unit(&self, unit_id: UnitId) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT * FROM deployments
            WHERE unit_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(DeploymentRow::into_record))
    }

    async fn history_for_unit(
        &self,
        unit_id: UnitId,
        limit: i64,
    ) -> Result<Vec<DeploymentRecord>> {
        let rows: Vec<DeploymentRow> = sqlx::query_as(
            r#"
            SELECT * FROM deployments
            WHERE unit_id = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(unit_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(DeploymentRow::into_record).collect())
    }

    async fn find_by_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentRecord>> {
        let rows: Vec<DeploymentRow> = sqlx::query_as(
            r#"
            SELECT * FROM deployments
            WHERE status = ?
            ORDER BY started_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(DeploymentRow::into_record).collect())
    }

    async fn prune_finished_before(&self, cutoff_millis: i64) -> Result<u64> {
        // The latest record per unit survives: dependency gating reads it
        let result = sqlx::query(
            r#"
            DELETE FROM deployments
            WHERE finished_at IS NOT NULL
              AND finished_at < ?
              AND id NOT IN (
                  SELECT (
                      SELECT d2.id FROM deployments d2
                      WHERE d2.unit_id = d1.unit_id
                      ORDER BY d2.started_at DESC, d2.id DESC
                      LIMIT 1
                  )
                  FROM (SELECT DISTINCT unit_id FROM deployments) d1
              )
            "#,
        )
        .bind(cutoff_millis)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct DeploymentRow {
    id: i64,
    unit_id: i64,
    commit_hash: String,
    status: String,
    started_at: i64,
    finished_at: Option<i64>,
    logs: Option<String>,
}

impl DeploymentRow {
    fn into_record(self) -> DeploymentRecord {
        let status = DeploymentStatus::from_str(&self.status).unwrap_or_else(|_| {
            warn!(
                deployment_id = self.id,
                status = %self.status,
                "Unknown status, reading as failed"
            );
            DeploymentStatus::Failed
        });

        DeploymentRecord {
            id: self.id,
            unit_id: self.unit_id,
            commit_hash: self.commit_hash,
            status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            logs: self.logs,
        }
    }
}
