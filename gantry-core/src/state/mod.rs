//! State management with SQLite persistence.
//!
//! The StateManager handles all persistent deployment state:
//! - Deployments and their lifecycle columns
//! - Deployment-container links (replaced as whole sets)
//! - Deployment metadata (durable, deployment-independent)
//!
//! Updates go through explicit column lists; transactions are opened only
//! around mutations and never held across host I/O.

use crate::error::{GantryError, Result};
use crate::types::{
    Commitment, Deployment, DeploymentContainer, DeploymentMetadata, DeploymentStatus,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tracing::{info, instrument};

pub mod migrations;

#[cfg(test)]
mod tests;

/// State manager for persistent storage.
#[derive(Clone)]
pub struct StateManager {
    pool: SqlitePool,
}

impl StateManager {
    /// Create a new StateManager with an in-memory database (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create a new StateManager with a database at the specified path.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Initializing state manager at {:?}", db_path);

        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    GantryError::InvalidConfig {
                        reason: format!(
                            "Failed to create directory {}: {}",
                            parent.display(),
                            e
                        ),
                    }
                })?;
            }
        }

        let mut options = SqliteConnectOptions::from_str(db_path.to_str().ok_or_else(|| {
            GantryError::InvalidConfig { reason: "Invalid database path".to_string() }
        })?)
        .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        options = options
            .create_if_missing(true)
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Debug);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        let manager = Self { pool };
        manager.run_migrations().await?;

        info!("State manager initialized successfully");
        Ok(manager)
    }

    #[instrument(skip(self))]
    async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    // ========================
    // Deployment operations
    // ========================

    /// Insert a new deployment.
    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id))]
    pub async fn insert_deployment(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments
                (id, host_id, stack_name, status, progress, stage, error, committed,
                 rollback_on_failure, created_at, started_at, completed_at, lease)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&deployment.id)
        .bind(&deployment.host_id)
        .bind(&deployment.stack_name)
        .bind(deployment.status.as_str())
        .bind(deployment.progress as i64)
        .bind(&deployment.stage)
        .bind(&deployment.error)
        .bind(deployment.commitment.is_committed() as i64)
        .bind(deployment.rollback_on_failure as i64)
        .bind(to_unix(deployment.created_at))
        .bind(deployment.started_at.map(to_unix))
        .bind(deployment.completed_at.map(to_unix))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("gantry_db_errors_total", "operation" => "insert_deployment")
                .increment(1);
            GantryError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    /// Get a deployment by id.
    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn get_deployment(&self, id: &str) -> Result<Deployment> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        match row {
            Some(row) => row_to_deployment(row),
            None => Err(GantryError::DeploymentNotFound { deployment_id: id.to_string() }),
        }
    }

    /// List all deployments, newest first.
    #[instrument(skip(self))]
    pub async fn list_deployments(&self) -> Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(row_to_deployment).collect()
    }

    /// List deployments targeting one host, newest first.
    #[instrument(skip(self))]
    pub async fn list_deployments_for_host(&self, host_id: &str) -> Result<Vec<Deployment>> {
        let rows =
            sqlx::query("SELECT * FROM deployments WHERE host_id = ? ORDER BY created_at DESC")
                .bind(host_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(row_to_deployment).collect()
    }

    /// Persist the mutable lifecycle columns of a deployment.
    ///
    /// The column list is the full allow-list; identity columns (id, host,
    /// stack, created_at, rollback policy) never change after insert.
    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id))]
    pub async fn update_deployment(&self, deployment: &Deployment) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployments
            SET status = ?, progress = ?, stage = ?, error = ?, committed = ?,
                started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(deployment.status.as_str())
        .bind(deployment.progress as i64)
        .bind(&deployment.stage)
        .bind(&deployment.error)
        .bind(deployment.commitment.is_committed() as i64)
        .bind(deployment.started_at.map(to_unix))
        .bind(deployment.completed_at.map(to_unix))
        .bind(&deployment.id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::counter!("gantry_db_errors_total", "operation" => "update_deployment")
                .increment(1);
            GantryError::DatabaseError(e.to_string())
        })?;

        Ok(())
    }

    /// Delete a deployment. Its container links cascade; metadata survives.
    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn delete_deployment(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM deployments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Acquire the execution lease for a deployment.
    ///
    /// Storage-enforced "one execution in flight per deployment id", valid
    /// across processes. Returns false when another execution holds it.
    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn acquire_execution_lease(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE deployments SET lease = 1 WHERE id = ? AND lease = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Release the execution lease.
    #[instrument(skip(self), fields(deployment_id = %id))]
    pub async fn release_execution_lease(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET lease = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ========================
    // Deployment containers
    // ========================

    /// Replace the whole container set of a deployment in one transaction.
    #[instrument(skip(self, containers), fields(deployment_id = %deployment_id))]
    pub async fn replace_containers(
        &self,
        deployment_id: &str,
        containers: &[DeploymentContainer],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM deployment_containers WHERE deployment_id = ?")
            .bind(deployment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        for (position, container) in containers.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO deployment_containers
                    (deployment_id, container_id, service_name, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(deployment_id)
            .bind(&container.container_id)
            .bind(&container.service_name)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Container links for a deployment, in creation order.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn containers_for(&self, deployment_id: &str) -> Result<Vec<DeploymentContainer>> {
        let rows = sqlx::query(
            "SELECT * FROM deployment_containers WHERE deployment_id = ? ORDER BY position",
        )
        .bind(deployment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| DeploymentContainer {
                deployment_id: row.get("deployment_id"),
                container_id: row.get("container_id"),
                service_name: row.get("service_name"),
            })
            .collect())
    }

    /// Latch the commitment point.
    ///
    /// Sets `committed`, replaces the container set, and upserts metadata in
    /// one transaction, so a crash cannot leave the flag and the rows
    /// disagreeing.
    #[instrument(skip(self, containers, metadata), fields(deployment_id = %deployment_id))]
    pub async fn record_commitment(
        &self,
        deployment_id: &str,
        containers: &[DeploymentContainer],
        metadata: &[DeploymentMetadata],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        sqlx::query("UPDATE deployments SET committed = 1 WHERE id = ?")
            .bind(deployment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        sqlx::query("DELETE FROM deployment_containers WHERE deployment_id = ?")
            .bind(deployment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        for (position, container) in containers.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO deployment_containers
                    (deployment_id, container_id, service_name, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(deployment_id)
            .bind(&container.container_id)
            .bind(&container.service_name)
            .bind(position as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        }

        for entry in metadata {
            sqlx::query(
                r#"
                INSERT INTO deployment_metadata
                    (composite_key, host_id, container_id, managed, deployment_id, service_name)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(composite_key) DO UPDATE SET
                    managed = excluded.managed,
                    deployment_id = excluded.deployment_id,
                    service_name = excluded.service_name
                "#,
            )
            .bind(entry.composite_key())
            .bind(&entry.host_id)
            .bind(&entry.container_id)
            .bind(entry.managed as i64)
            .bind(&entry.deployment_id)
            .bind(&entry.service_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| GantryError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ========================
    // Deployment metadata
    // ========================

    /// Insert or update one metadata record.
    #[instrument(skip(self, entry), fields(key = %entry.composite_key()))]
    pub async fn upsert_metadata(&self, entry: &DeploymentMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_metadata
                (composite_key, host_id, container_id, managed, deployment_id, service_name)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(composite_key) DO UPDATE SET
                managed = excluded.managed,
                deployment_id = excluded.deployment_id,
                service_name = excluded.service_name
            "#,
        )
        .bind(entry.composite_key())
        .bind(&entry.host_id)
        .bind(&entry.container_id)
        .bind(entry.managed as i64)
        .bind(&entry.deployment_id)
        .bind(&entry.service_name)
        .execute(&self.pool)
        .await
        .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    /// Look up metadata by (host, container).
    pub async fn get_metadata(
        &self,
        host_id: &str,
        container_id: &str,
    ) -> Result<Option<DeploymentMetadata>> {
        let row = sqlx::query("SELECT * FROM deployment_metadata WHERE composite_key = ?")
            .bind(format!("{}:{}", host_id, container_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        Ok(row.map(row_to_metadata))
    }

    /// All metadata produced by one deployment.
    pub async fn metadata_for_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<Vec<DeploymentMetadata>> {
        let rows = sqlx::query("SELECT * FROM deployment_metadata WHERE deployment_id = ?")
            .bind(deployment_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| GantryError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_metadata).collect())
    }
}

fn to_unix(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn from_unix(secs: i64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

fn row_to_deployment(row: sqlx::sqlite::SqliteRow) -> Result<Deployment> {
    let status_str: String = row.get("status");
    let status = DeploymentStatus::parse(&status_str).ok_or_else(|| {
        GantryError::DatabaseError(format!("Unknown deployment status '{}'", status_str))
    })?;

    let committed: i64 = row.get("committed");
    let commitment =
        if committed != 0 { Commitment::Committed } else { Commitment::Uncommitted };

    Ok(Deployment {
        id: row.get("id"),
        host_id: row.get("host_id"),
        stack_name: row.get("stack_name"),
        status,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        stage: row.get("stage"),
        error: row.get("error"),
        commitment,
        rollback_on_failure: row.get::<i64, _>("rollback_on_failure") != 0,
        created_at: from_unix(row.get("created_at")),
        started_at: row.get::<Option<i64>, _>("started_at").map(from_unix),
        completed_at: row.get::<Option<i64>, _>("completed_at").map(from_unix),
    })
}

fn row_to_metadata(row: sqlx::sqlite::SqliteRow) -> DeploymentMetadata {
    DeploymentMetadata {
        host_id: row.get("host_id"),
        container_id: row.get("container_id"),
        managed: row.get::<i64, _>("managed") != 0,
        deployment_id: row.get("deployment_id"),
        service_name: row.get("service_name"),
    }
}
