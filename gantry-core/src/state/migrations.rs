//! Database migrations.

use crate::error::{GantryError, Result};
use sqlx::SqlitePool;
use tracing::{info, instrument};

const SCHEMA_VERSION: i64 = 3;

#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    let current_version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    if current_version < 3 {
        migrate_to_v3(pool).await?;
    }

    Ok(())
}

async fn set_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("DELETE FROM schema_version")
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    Ok(())
}

#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 1");

    // Deployments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            id TEXT PRIMARY KEY,
            host_id TEXT NOT NULL,
            stack_name TEXT NOT NULL,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            stage TEXT NOT NULL DEFAULT '',
            error TEXT,
            committed INTEGER NOT NULL DEFAULT 0,
            rollback_on_failure INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deployments_host ON deployments(host_id)")
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_deployments_status ON deployments(status)")
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    // Deployment-container link table; position preserves creation order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment_containers (
            deployment_id TEXT NOT NULL REFERENCES deployments(id) ON DELETE CASCADE,
            container_id TEXT NOT NULL,
            service_name TEXT,
            position INTEGER NOT NULL,
            PRIMARY KEY (deployment_id, container_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    set_version(pool, 1).await?;

    info!("Migration to schema version 1 complete");
    Ok(())
}

/// Migration to schema version 2: deployment metadata, keyed by composite key.
/// Deliberately no foreign key: metadata outlives its deployment row.
#[instrument(skip(pool))]
async fn migrate_to_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 2");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployment_metadata (
            composite_key TEXT PRIMARY KEY,
            host_id TEXT NOT NULL,
            container_id TEXT NOT NULL,
            managed INTEGER NOT NULL DEFAULT 1,
            deployment_id TEXT,
            service_name TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_metadata_deployment ON deployment_metadata(deployment_id)",
    )
    .execute(pool)
    .await
    .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_metadata_host ON deployment_metadata(host_id)")
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    set_version(pool, 2).await?;

    info!("Migration to schema version 2 complete");
    Ok(())
}

/// Migration to schema version 3: execution lease column, the storage-enforced
/// one-execution-in-flight guard.
#[instrument(skip(pool))]
async fn migrate_to_v3(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 3");

    sqlx::query("ALTER TABLE deployments ADD COLUMN lease INTEGER NOT NULL DEFAULT 0")
        .execute(pool)
        .await
        .map_err(|e| GantryError::MigrationFailed { reason: e.to_string() })?;

    set_version(pool, 3).await?;

    info!("Migration to schema version 3 complete");
    Ok(())
}
