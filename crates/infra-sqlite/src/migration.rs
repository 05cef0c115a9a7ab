// Migration Runner

use crate::error::map_sqlx_error;
use citewatch_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Ordered migrations; the index + 1 is the schema version
const MIGRATIONS: &[(&str, &str)] = &[(
    "Initial schema",
    include_str!("../migrations/001_initial_schema.sql"),
)];

/// Bring the schema up to the latest version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(map_sqlx_error)?
            .unwrap_or(0)
    } else {
        0
    };

    info!(current_version = %current_version, "Checking database schema");

    for (idx, (name, sql)) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if current_version < version {
            info!(version = %version, name = %name, "Applying migration");
            apply_migration(pool, sql).await?;
        }
    }
    Ok(())
}

/// Apply a single migration file in one transaction
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    for statement in sql.split(';') {
        let clean_statement = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_statement = clean_statement.trim();

        if !clean_statement.is_empty() {
            sqlx::query(clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}
