//! Provisioning client contract

use crate::error::Result;
use async_trait::async_trait;
use atmo_types::{ClusterInfo, JobflowId, ResultVisibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the provider needs to create a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Owner email, tagged on the remote resource
    pub owner_email: String,

    /// Cluster name, tagged on the remote resource
    pub identifier: String,

    /// Number of nodes requested by the user
    pub size: u32,

    /// Public key authorized for SSH access, interactive clusters only
    pub public_key: Option<String>,

    /// Provider release label without the `emr-` prefix
    pub emr_release: String,

    /// Notebook to execute, scheduled job runs only
    pub job: Option<JobStep>,
}

/// Notebook execution attached to a job run's cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    /// Storage key of the notebook
    pub notebook_key: String,

    /// Result bucket selection
    pub result_visibility: ResultVisibility,

    /// Run timeout in hours
    pub job_timeout_hours: u32,
}

/// Pricing model of an instance group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    OnDemand,
    Spot,
}

/// One homogeneous group of nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceGroup {
    pub name: &'static str,
    pub role: &'static str,
    pub market: MarketType,
    pub count: u32,
}

/// Node layout for a requested size.
///
/// A size of one yields a single combined node. Anything larger gets one
/// on-demand coordinator plus `size - 1` spot-priced workers.
pub fn instance_groups(size: u32) -> Vec<InstanceGroup> {
    let mut groups = vec![InstanceGroup {
        name: "Master",
        role: "MASTER",
        market: MarketType::OnDemand,
        count: 1,
    }];

    if size > 1 {
        groups.push(InstanceGroup {
            name: "Worker Instances",
            role: "CORE",
            market: MarketType::Spot,
            count: size - 1,
        });
    }

    groups
}

/// Cloud compute API consumed by the orchestrator.
///
/// Implementations must be cheap to share; the orchestrator holds one
/// instance behind an `Arc` for the lifetime of the process.
#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    /// Request a new cluster and return its remote handle.
    ///
    /// No retries happen here; a rejected request leaves nothing behind.
    async fn start(&self, spec: &ClusterSpec) -> Result<JobflowId>;

    /// Describe one cluster. Unknown handles yield `NotFound`.
    async fn info(&self, jobflow_id: &JobflowId) -> Result<ClusterInfo>;

    /// Describe every cluster created after the given instant
    async fn list(&self, created_after: DateTime<Utc>) -> Result<Vec<ClusterInfo>>;

    /// Update the remote name tag
    async fn rename(&self, jobflow_id: &JobflowId, new_identifier: &str) -> Result<()>;

    /// Request termination. Terminating an already final cluster is a no-op.
    async fn stop(&self, jobflow_id: &JobflowId) -> Result<()>;
}
