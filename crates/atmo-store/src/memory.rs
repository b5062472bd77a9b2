//! In-memory storage implementation

use crate::error::{StorageError, StorageResult};
use crate::traits::*;
use async_trait::async_trait;
use atmo_types::{
    Cluster, ClusterChange, ClusterId, JobChange, RunId, SparkJob, SparkJobId, SparkJobRun, UserRef,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    clusters: Arc<RwLock<HashMap<ClusterId, Cluster>>>,
    jobs: Arc<RwLock<HashMap<SparkJobId, SparkJob>>>,
    runs: Arc<RwLock<HashMap<RunId, SparkJobRun>>>,
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_clusters_first(mut clusters: Vec<Cluster>) -> Vec<Cluster> {
    clusters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    clusters
}

fn by_start_date(mut jobs: Vec<SparkJob>) -> Vec<SparkJob> {
    jobs.sort_by(|a, b| {
        a.start_date
            .cmp(&b.start_date)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    jobs
}

#[async_trait]
impl ClusterStorage for InMemoryStorage {
    async fn get_cluster(&self, id: &ClusterId) -> StorageResult<Option<Cluster>> {
        let clusters = self.clusters.read().await;
        Ok(clusters.get(id).cloned())
    }

    async fn list_clusters(&self) -> StorageResult<Vec<Cluster>> {
        let clusters = self.clusters.read().await;
        Ok(newest_clusters_first(clusters.values().cloned().collect()))
    }

    async fn list_clusters_for_user(&self, user: &UserRef) -> StorageResult<Vec<Cluster>> {
        let clusters = self.clusters.read().await;
        Ok(newest_clusters_first(
            clusters
                .values()
                .filter(|c| &c.created_by == user)
                .cloned()
                .collect(),
        ))
    }

    async fn list_active_clusters(&self) -> StorageResult<Vec<Cluster>> {
        let clusters = self.clusters.read().await;
        Ok(newest_clusters_first(
            clusters
                .values()
                .filter(|c| c.jobflow_id.is_some() && c.is_active())
                .cloned()
                .collect(),
        ))
    }

    async fn upsert_cluster(&self, cluster: Cluster) -> StorageResult<()> {
        let mut clusters = self.clusters.write().await;
        clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn change_cluster(
        &self,
        id: &ClusterId,
        change: &ClusterChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<Cluster>> {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let changed = cluster.apply_change(change, now);
        Ok(Updated {
            record: cluster.clone(),
            changed,
        })
    }

    async fn delete_cluster(&self, id: &ClusterId) -> StorageResult<bool> {
        let mut clusters = self.clusters.write().await;
        Ok(clusters.remove(id).is_some())
    }
}

#[async_trait]
impl SparkJobStorage for InMemoryStorage {
    async fn get_job(&self, id: &SparkJobId) -> StorageResult<Option<SparkJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(id).cloned())
    }

    async fn list_jobs(&self) -> StorageResult<Vec<SparkJob>> {
        let jobs = self.jobs.read().await;
        Ok(by_start_date(jobs.values().cloned().collect()))
    }

    async fn list_jobs_for_user(&self, user: &UserRef) -> StorageResult<Vec<SparkJob>> {
        let jobs = self.jobs.read().await;
        Ok(by_start_date(
            jobs.values()
                .filter(|j| &j.created_by == user)
                .cloned()
                .collect(),
        ))
    }

    async fn upsert_job(&self, job: SparkJob) -> StorageResult<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn change_job(
        &self,
        id: &SparkJobId,
        change: &JobChange,
        now: DateTime<Utc>,
    ) -> StorageResult<Updated<SparkJob>> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let changed = job.apply_change(change, now);
        Ok(Updated {
            record: job.clone(),
            changed,
        })
    }

    async fn delete_job(&self, id: &SparkJobId) -> StorageResult<bool> {
        let mut jobs = self.jobs.write().await;
        let removed = jobs.remove(id).is_some();
        if removed {
            let mut runs = self.runs.write().await;
            runs.retain(|_, run| &run.spark_job_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl RunStorage for InMemoryStorage {
    async fn get_run(&self, id: &RunId) -> StorageResult<Option<SparkJobRun>> {
        let runs = self.runs.read().await;
        Ok(runs.get(id).cloned())
    }

    async fn latest_run(&self, job_id: &SparkJobId) -> StorageResult<Option<SparkJobRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| &r.spark_job_id == job_id)
            .max_by_key(|r| r.scheduled_at)
            .cloned())
    }

    async fn list_runs_for_job(&self, job_id: &SparkJobId) -> StorageResult<Vec<SparkJobRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<SparkJobRun> = runs
            .values()
            .filter(|r| &r.spark_job_id == job_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(result)
    }

    async fn list_active_runs(&self) -> StorageResult<Vec<SparkJobRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<SparkJobRun> =
            runs.values().filter(|r| r.is_active()).cloned().collect();
        result.sort_by_key(|r| r.scheduled_at);
        Ok(result)
    }

    async fn list_runs_with_unsent_alerts(&self) -> StorageResult<Vec<SparkJobRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<SparkJobRun> = runs
            .values()
            .filter(|r| r.has_unsent_alert())
            .cloned()
            .collect();
        result.sort_by_key(|r| r.scheduled_at);
        Ok(result)
    }

    async fn insert_run(&self, run: SparkJobRun) -> StorageResult<()> {
        let mut runs = self.runs.write().await;

        if runs.contains_key(&run.id) {
            return Err(StorageError::Conflict(format!("{} already exists", run.id)));
        }
        if let Some(active) = runs
            .values()
            .find(|r| r.spark_job_id == run.spark_job_id && r.is_active())
        {
            return Err(StorageError::Conflict(format!(
                "{} already has active {}",
                run.spark_job_id, active.id
            )));
        }

        runs.insert(run.id, run);
        Ok(())
    }

    async fn update_run(&self, run: SparkJobRun) -> StorageResult<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run;
                Ok(())
            }
            None => Err(StorageError::NotFound(run.id.to_string())),
        }
    }

    async fn delete_run(&self, id: &RunId) -> StorageResult<bool> {
        let mut runs = self.runs.write().await;
        Ok(runs.remove(id).is_some())
    }
}

impl Storage for InMemoryStorage {}
