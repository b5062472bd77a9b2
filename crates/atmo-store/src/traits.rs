//! Storage trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use atmo_types::{
    Cluster, ClusterChange, ClusterId, JobChange, RunId, SparkJob, SparkJobId, SparkJobRun, UserRef,
};
use chrono::{DateTime, Utc};

/// Record as saved after a change was applied
#[derive(Debug, Clone, PartialEq)]
pub struct Updated<T> {
    pub record: T,
    /// Whether the change moved anything
    pub changed: bool,
}

/// Combined storage trait
#[async_trait]
pub trait Storage: ClusterStorage + SparkJobStorage + RunStorage + Send + Sync {}

/// Storage for user clusters
#[async_trait]
pub trait ClusterStorage: Send + Sync {
    /// Get a cluster by ID
    async fn get_cluster(&self, id: &ClusterId) -> StorageResult<Option<Cluster>>;

    /// List all clusters, newest first
    async fn list_clusters(&self) -> StorageResult<Vec<Cluster>>;

    /// List clusters owned by a user, newest first
    async fn list_clusters_for_user(&self, user: &UserRef) -> StorageResult<Vec<Cluster>>;

    /// Provisioned clusters whose last known status is not final
    async fn list_active_clusters(&self) -> StorageResult<Vec<Cluster>>;

    /// Create or replace a cluster
    async fn upsert_cluster(&self, cluster: Cluster) -> StorageResult<()>;

    /// Apply a change to the current saved cluster atomically.
    ///
    /// Fails with `NotFound` if the cluster is gone.
    async fn change_cluster(
        &self,
        id: &ClusterId,
        change: &ClusterChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<Cluster>>;

    /// Delete a cluster by ID
    async fn delete_cluster(&self, id: &ClusterId) -> StorageResult<bool>;
}

/// Storage for scheduled job definitions
#[async_trait]
pub trait SparkJobStorage: Send + Sync {
    /// Get a job by ID
    async fn get_job(&self, id: &SparkJobId) -> StorageResult<Option<SparkJob>>;

    /// List all jobs, ordered by ascending start date
    async fn list_jobs(&self) -> StorageResult<Vec<SparkJob>>;

    /// List jobs owned by a user, ordered by ascending start date
    async fn list_jobs_for_user(&self, user: &UserRef) -> StorageResult<Vec<SparkJob>>;

    /// Create or replace a job
    async fn upsert_job(&self, job: SparkJob) -> StorageResult<()>;

    /// Apply a change to the current saved job atomically.
    ///
    /// Fails with `NotFound` if the job is gone.
    async fn change_job(
        &self,
        id: &SparkJobId,
        change: &JobChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<SparkJob>>;

    /// Delete a job and all of its runs
    async fn delete_job(&self, id: &SparkJobId) -> StorageResult<bool>;
}

/// Storage for job runs
#[async_trait]
pub trait RunStorage: Send + Sync {
    /// Get a run by ID
    async fn get_run(&self, id: &RunId) -> StorageResult<Option<SparkJobRun>>;

    /// Most recently scheduled run of a job
    async fn latest_run(&self, job_id: &SparkJobId) -> StorageResult<Option<SparkJobRun>>;

    /// All runs of a job, newest first
    async fn list_runs_for_job(&self, job_id: &SparkJobId) -> StorageResult<Vec<SparkJobRun>>;

    /// Runs whose status is not final, oldest first
    async fn list_active_runs(&self) -> StorageResult<Vec<SparkJobRun>>;

    /// Runs carrying an alert whose notification has not gone out
    async fn list_runs_with_unsent_alerts(&self) -> StorageResult<Vec<SparkJobRun>>;

    /// Store a new run.
    ///
    /// Fails with `Conflict` when the job already has a non-final run.
    async fn insert_run(&self, run: SparkJobRun) -> StorageResult<()>;

    /// Update an existing run. Fails with `NotFound` if it does not exist.
    async fn update_run(&self, run: SparkJobRun) -> StorageResult<()>;

    /// Delete a run by ID
    async fn delete_run(&self, id: &RunId) -> StorageResult<bool>;
}
