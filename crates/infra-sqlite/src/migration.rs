// Migration Runner

use crate::error::map_sqlx_error;
use shiparr_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Embedded migrations as (version, description, sql), in apply order.
/// Every file ends by recording its own version in `schema_version`.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "Units and deployment history",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    (
        2,
        "Project tokens and unit notification routes",
        include_str!("../migrations/002_delivery_settings.sql"),
    ),
];

/// Bring the schema up to the latest embedded version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = schema_version(pool).await?;
    info!(current_version = current, "Checking database schema");

    for (version, description, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        info!(version = version, "Applying migration: {}", description);
        apply_migration(pool, sql).await?;
    }

    Ok(())
}

/// Highest applied version, 0 for a fresh database
async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;
    if has_table == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// All statements of one file commit together or not at all
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    for statement in statements(sql) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }
    tx.commit().await.map_err(map_sqlx_error)
}

/// Split a migration file on `;`, dropping `--` comment lines and blanks
fn statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(|chunk| {
            chunk
                .lines()
                .filter(|line| !line.trim_start().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}
