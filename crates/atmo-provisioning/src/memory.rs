//! In-memory provisioner
//!
//! Simulates the provider for development mode and tests. Clusters live in
//! a map keyed by their handle; tests steer them with [`InMemoryProvisioner::set_state`]
//! and friends, development mode lets them walk through the lifecycle on
//! every observation.

use crate::error::{ProvisioningError, Result};
use crate::provisioner::{ClusterProvisioner, ClusterSpec};
use async_trait::async_trait;
use atmo_types::{ClusterInfo, ClusterStatus, JobflowId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct SimulatedCluster {
    spec: ClusterSpec,
    info: ClusterInfo,
}

/// Simulated cloud provider
#[derive(Debug)]
pub struct InMemoryProvisioner {
    clusters: RwLock<HashMap<JobflowId, SimulatedCluster>>,
    rejections: RwLock<VecDeque<String>>,
    initial_state: ClusterStatus,
    auto_advance: bool,
    sequence: AtomicU64,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvisioner {
    /// Clusters start in `STARTING` and stay there until told otherwise
    pub fn new() -> Self {
        Self {
            clusters: RwLock::new(HashMap::new()),
            rejections: RwLock::new(VecDeque::new()),
            initial_state: ClusterStatus::Starting,
            auto_advance: false,
            sequence: AtomicU64::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Clusters advance one lifecycle step every time they are observed
    pub fn simulated() -> Self {
        Self {
            auto_advance: true,
            ..Self::new()
        }
    }

    /// State new clusters report right after `start`
    pub fn with_initial_state(mut self, state: ClusterStatus) -> Self {
        self.initial_state = state;
        self
    }

    /// Make the next `start` call fail with a provider rejection
    pub async fn reject_next_start(&self, message: impl Into<String>) {
        self.rejections.write().await.push_back(message.into());
    }

    /// Overwrite the remote state of a cluster
    pub async fn set_state(&self, jobflow_id: &JobflowId, state: ClusterStatus) {
        let mut clusters = self.clusters.write().await;
        if let Some(cluster) = clusters.get_mut(jobflow_id) {
            cluster.info.state = state;
            if state.is_final() && cluster.info.end_time.is_none() {
                cluster.info.end_time = Some(Utc::now());
            }
        }
    }

    /// Overwrite the full remote description of a cluster
    pub async fn set_info(&self, info: ClusterInfo) {
        let mut clusters = self.clusters.write().await;
        if let Some(cluster) = clusters.get_mut(&info.jobflow_id) {
            cluster.info = info;
        }
    }

    /// Drop a cluster as if it was removed out of band
    pub async fn forget(&self, jobflow_id: &JobflowId) {
        self.clusters.write().await.remove(jobflow_id);
    }

    pub async fn cluster_count(&self) -> usize {
        self.clusters.read().await.len()
    }

    /// Spec a cluster was started with, including renames
    pub async fn spec(&self, jobflow_id: &JobflowId) -> Option<ClusterSpec> {
        self.clusters
            .read()
            .await
            .get(jobflow_id)
            .map(|c| c.spec.clone())
    }

    pub async fn state(&self, jobflow_id: &JobflowId) -> Option<ClusterStatus> {
        self.clusters
            .read()
            .await
            .get(jobflow_id)
            .map(|c| c.info.state)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn next_handle(&self) -> JobflowId {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        JobflowId::new(format!("j-SIM{:010}", n))
    }

    fn advance(cluster: &mut SimulatedCluster, now: DateTime<Utc>) {
        let next = match cluster.info.state {
            ClusterStatus::Starting => ClusterStatus::Bootstrapping,
            ClusterStatus::Bootstrapping => ClusterStatus::Running,
            ClusterStatus::Running if cluster.spec.job.is_some() => ClusterStatus::Terminating,
            ClusterStatus::Running => ClusterStatus::Waiting,
            ClusterStatus::Terminating => ClusterStatus::Terminated,
            other => other,
        };

        match next {
            ClusterStatus::Running => {
                cluster.info.ready_time = Some(now);
                cluster.info.public_address = Some(format!(
                    "{}.simulated.internal",
                    cluster.info.jobflow_id.as_str().to_lowercase()
                ));
            }
            ClusterStatus::Terminated => {
                cluster.info.end_time = Some(now);
                if cluster.info.state_change_reason_code.is_none() {
                    cluster.info.state_change_reason_code = Some("ALL_STEPS_COMPLETED".to_string());
                }
            }
            _ => {}
        }
        cluster.info.state = next;
    }

    async fn observe(&self, jobflow_id: &JobflowId) -> Option<ClusterInfo> {
        if self.auto_advance {
            let mut clusters = self.clusters.write().await;
            let cluster = clusters.get_mut(jobflow_id)?;
            Self::advance(cluster, Utc::now());
            Some(cluster.info.clone())
        } else {
            self.clusters
                .read()
                .await
                .get(jobflow_id)
                .map(|c| c.info.clone())
        }
    }
}

#[async_trait]
impl ClusterProvisioner for InMemoryProvisioner {
    async fn start(&self, spec: &ClusterSpec) -> Result<JobflowId> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.rejections.write().await.pop_front() {
            return Err(ProvisioningError::Rejected {
                code: "ValidationException".to_string(),
                message,
            });
        }

        let jobflow_id = self.next_handle();
        let info = ClusterInfo::new(jobflow_id.clone(), self.initial_state, Utc::now());
        self.clusters.write().await.insert(
            jobflow_id.clone(),
            SimulatedCluster {
                spec: spec.clone(),
                info,
            },
        );

        tracing::debug!(jobflow_id = %jobflow_id, identifier = %spec.identifier, "Simulated cluster started");
        Ok(jobflow_id)
    }

    async fn info(&self, jobflow_id: &JobflowId) -> Result<ClusterInfo> {
        self.observe(jobflow_id)
            .await
            .ok_or_else(|| ProvisioningError::NotFound(jobflow_id.to_string()))
    }

    async fn list(&self, created_after: DateTime<Utc>) -> Result<Vec<ClusterInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let handles: Vec<JobflowId> = {
            let clusters = self.clusters.read().await;
            let mut matching: Vec<&SimulatedCluster> = clusters
                .values()
                .filter(|c| c.info.creation_time >= created_after)
                .collect();
            matching.sort_by_key(|c| c.info.creation_time);
            matching.iter().map(|c| c.info.jobflow_id.clone()).collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Some(info) = self.observe(&handle).await {
                infos.push(info);
            }
        }
        Ok(infos)
    }

    async fn rename(&self, jobflow_id: &JobflowId, new_identifier: &str) -> Result<()> {
        let mut clusters = self.clusters.write().await;
        let cluster = clusters
            .get_mut(jobflow_id)
            .ok_or_else(|| ProvisioningError::NotFound(jobflow_id.to_string()))?;
        cluster.spec.identifier = new_identifier.to_string();
        Ok(())
    }

    async fn stop(&self, jobflow_id: &JobflowId) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        let mut clusters = self.clusters.write().await;
        if let Some(cluster) = clusters.get_mut(jobflow_id) {
            if !cluster.info.state.is_final() {
                cluster.info.state = ClusterStatus::Terminated;
                cluster.info.end_time = Some(Utc::now());
                cluster.info.state_change_reason_code = Some("USER_REQUEST".to_string());
                cluster.info.state_change_reason_message =
                    Some("Terminated by user request".to_string());
            }
        }
        Ok(())
    }
}
