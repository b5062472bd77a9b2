//! PostgreSQL storage implementation
//!
//! Entities are stored as JSONB documents next to the handful of columns the
//! queries filter and sort on. The one-active-run-per-job rule is enforced
//! by a partial unique index. Field-scoped changes lock the row with
//! `SELECT ... FOR UPDATE` and apply the change to what is saved.

use crate::error::{StorageError, StorageResult};
use crate::traits::*;
use async_trait::async_trait;
use atmo_types::{
    Cluster, ClusterChange, ClusterId, ClusterStatus, JobChange, RunId, SparkJob, SparkJobId,
    SparkJobRun, UserRef,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        tracing::info!(max_connections, "PostgreSQL storage ready");
        Ok(storage)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        let final_states = ClusterStatus::FINAL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id UUID PRIMARY KEY,
                created_by TEXT NOT NULL,
                jobflow_id TEXT,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                modified_at TIMESTAMPTZ NOT NULL
            );
            "#
            .to_string(),
            r#"CREATE INDEX IF NOT EXISTS clusters_created_by ON clusters(created_by);"#.to_string(),
            r#"CREATE INDEX IF NOT EXISTS clusters_status ON clusters(status);"#.to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS spark_jobs (
                id UUID PRIMARY KEY,
                created_by TEXT NOT NULL,
                start_date TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                modified_at TIMESTAMPTZ NOT NULL
            );
            "#
            .to_string(),
            r#"CREATE INDEX IF NOT EXISTS spark_jobs_created_by ON spark_jobs(created_by);"#
                .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS spark_job_runs (
                id UUID PRIMARY KEY,
                spark_job_id UUID NOT NULL REFERENCES spark_jobs(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                scheduled_at TIMESTAMPTZ NOT NULL,
                alert_pending BOOLEAN NOT NULL DEFAULT FALSE,
                data JSONB NOT NULL
            );
            "#
            .to_string(),
            r#"CREATE INDEX IF NOT EXISTS spark_job_runs_job ON spark_job_runs(spark_job_id, scheduled_at DESC);"#
                .to_string(),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS spark_job_runs_one_active \
                 ON spark_job_runs(spark_job_id) WHERE status NOT IN ({});",
                final_states
            ),
        ];

        for stmt in statements {
            sqlx::query(&stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(())
    }

    fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<Value> {
        serde_json::to_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
    }

    fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> StorageResult<T> {
        serde_json::from_value(value)
            .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))
    }

    fn decode_rows<T: serde::de::DeserializeOwned>(
        rows: Vec<sqlx::postgres::PgRow>,
    ) -> StorageResult<Vec<T>> {
        rows.into_iter()
            .map(|row| {
                let data: Value = row
                    .try_get("data")
                    .map_err(|e| StorageError::Query(e.to_string()))?;
                Self::from_json(data)
            })
            .collect()
    }

    fn decode_row<T: serde::de::DeserializeOwned>(
        row: Option<sqlx::postgres::PgRow>,
    ) -> StorageResult<Option<T>> {
        Ok(Self::decode_rows(row.into_iter().collect())?.pop())
    }

    fn final_states() -> Vec<String> {
        ClusterStatus::FINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

fn query_error(e: sqlx::Error) -> StorageError {
    let unique_violation = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false);

    if unique_violation {
        StorageError::Conflict(e.to_string())
    } else {
        StorageError::Query(e.to_string())
    }
}

#[async_trait]
impl ClusterStorage for PostgresStorage {
    async fn get_cluster(&self, id: &ClusterId) -> StorageResult<Option<Cluster>> {
        let row = sqlx::query("SELECT data FROM clusters WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        Self::decode_row(row)
    }

    async fn list_clusters(&self) -> StorageResult<Vec<Cluster>> {
        let rows = sqlx::query("SELECT data FROM clusters ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_clusters_for_user(&self, user: &UserRef) -> StorageResult<Vec<Cluster>> {
        let rows = sqlx::query(
            "SELECT data FROM clusters WHERE created_by = $1 ORDER BY created_at DESC",
        )
        .bind(user.email())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_active_clusters(&self) -> StorageResult<Vec<Cluster>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM clusters
            WHERE jobflow_id IS NOT NULL AND status <> ALL($1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(Self::final_states())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn upsert_cluster(&self, cluster: Cluster) -> StorageResult<()> {
        let data = Self::to_json(&cluster)?;

        sqlx::query(
            r#"
            INSERT INTO clusters (id, created_by, jobflow_id, status, data, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                jobflow_id = EXCLUDED.jobflow_id,
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                modified_at = EXCLUDED.modified_at
            "#,
        )
        .bind(*cluster.id.as_uuid())
        .bind(cluster.created_by.email())
        .bind(cluster.jobflow_id.as_ref().map(|h| h.as_str().to_string()))
        .bind(cluster.most_recent_status.as_str())
        .bind(data)
        .bind(cluster.created_at)
        .bind(cluster.modified_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn change_cluster(
        &self,
        id: &ClusterId,
        change: &ClusterChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<Cluster>> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let row = sqlx::query("SELECT data FROM clusters WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let mut cluster: Cluster =
            Self::decode_row(row)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let changed = cluster.apply_change(change, now);
        if changed {
            sqlx::query(
                r#"
                UPDATE clusters
                SET status = $2, data = $3, modified_at = $4
                WHERE id = $1
                "#,
            )
            .bind(*cluster.id.as_uuid())
            .bind(cluster.most_recent_status.as_str())
            .bind(Self::to_json(&cluster)?)
            .bind(cluster.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(Updated {
            record: cluster,
            changed,
        })
    }

    async fn delete_cluster(&self, id: &ClusterId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM clusters WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SparkJobStorage for PostgresStorage {
    async fn get_job(&self, id: &SparkJobId) -> StorageResult<Option<SparkJob>> {
        let row = sqlx::query("SELECT data FROM spark_jobs WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        Self::decode_row(row)
    }

    async fn list_jobs(&self) -> StorageResult<Vec<SparkJob>> {
        let rows = sqlx::query("SELECT data FROM spark_jobs ORDER BY start_date, created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_jobs_for_user(&self, user: &UserRef) -> StorageResult<Vec<SparkJob>> {
        let rows = sqlx::query(
            "SELECT data FROM spark_jobs WHERE created_by = $1 ORDER BY start_date, created_at",
        )
        .bind(user.email())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn upsert_job(&self, job: SparkJob) -> StorageResult<()> {
        let data = Self::to_json(&job)?;

        sqlx::query(
            r#"
            INSERT INTO spark_jobs (id, created_by, start_date, data, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                start_date = EXCLUDED.start_date,
                data = EXCLUDED.data,
                modified_at = EXCLUDED.modified_at
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.created_by.email())
        .bind(job.start_date)
        .bind(data)
        .bind(job.created_at)
        .bind(job.modified_at)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn change_job(
        &self,
        id: &SparkJobId,
        change: &JobChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<SparkJob>> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        let row = sqlx::query("SELECT data FROM spark_jobs WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;
        let mut job: SparkJob =
            Self::decode_row(row)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;

        let changed = job.apply_change(change, now);
        if changed {
            sqlx::query(
                r#"
                UPDATE spark_jobs
                SET start_date = $2, data = $3, modified_at = $4
                WHERE id = $1
                "#,
            )
            .bind(*job.id.as_uuid())
            .bind(job.start_date)
            .bind(Self::to_json(&job)?)
            .bind(job.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;
        Ok(Updated {
            record: job,
            changed,
        })
    }

    async fn delete_job(&self, id: &SparkJobId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM spark_jobs WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RunStorage for PostgresStorage {
    async fn get_run(&self, id: &RunId) -> StorageResult<Option<SparkJobRun>> {
        let row = sqlx::query("SELECT data FROM spark_job_runs WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        Self::decode_row(row)
    }

    async fn latest_run(&self, job_id: &SparkJobId) -> StorageResult<Option<SparkJobRun>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM spark_job_runs
            WHERE spark_job_id = $1
            ORDER BY scheduled_at DESC
            LIMIT 1
            "#,
        )
        .bind(*job_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_row(row)
    }

    async fn list_runs_for_job(&self, job_id: &SparkJobId) -> StorageResult<Vec<SparkJobRun>> {
        let rows = sqlx::query(
            "SELECT data FROM spark_job_runs WHERE spark_job_id = $1 ORDER BY scheduled_at DESC",
        )
        .bind(*job_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_active_runs(&self) -> StorageResult<Vec<SparkJobRun>> {
        let rows = sqlx::query(
            "SELECT data FROM spark_job_runs WHERE status <> ALL($1) ORDER BY scheduled_at",
        )
        .bind(Self::final_states())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn list_runs_with_unsent_alerts(&self) -> StorageResult<Vec<SparkJobRun>> {
        let rows = sqlx::query(
            "SELECT data FROM spark_job_runs WHERE alert_pending ORDER BY scheduled_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Self::decode_rows(rows)
    }

    async fn insert_run(&self, run: SparkJobRun) -> StorageResult<()> {
        let data = Self::to_json(&run)?;

        sqlx::query(
            r#"
            INSERT INTO spark_job_runs (id, spark_job_id, status, scheduled_at, alert_pending, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(*run.id.as_uuid())
        .bind(*run.spark_job_id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.scheduled_at)
        .bind(run.has_unsent_alert())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn update_run(&self, run: SparkJobRun) -> StorageResult<()> {
        let data = Self::to_json(&run)?;

        let result = sqlx::query(
            r#"
            UPDATE spark_job_runs
            SET status = $2, alert_pending = $3, data = $4
            WHERE id = $1
            "#,
        )
        .bind(*run.id.as_uuid())
        .bind(run.status.as_str())
        .bind(run.has_unsent_alert())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(run.id.to_string()));
        }
        Ok(())
    }

    async fn delete_run(&self, id: &RunId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM spark_job_runs WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() > 0)
    }
}

impl Storage for PostgresStorage {}
