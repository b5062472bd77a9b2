//! Snapshot of a remote cluster as reported by the provider

use crate::{ClusterStatus, JobflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote cluster description returned by `info` and `list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Remote handle
    pub jobflow_id: JobflowId,

    /// Remote state mapped into the local vocabulary
    pub state: ClusterStatus,

    /// When the provider accepted the cluster
    pub creation_time: DateTime<Utc>,

    /// When the cluster became ready for work
    pub ready_time: Option<DateTime<Utc>>,

    /// When the cluster reached a final state
    pub end_time: Option<DateTime<Utc>>,

    /// Public DNS name of the coordinator node, once known
    pub public_address: Option<String>,

    /// Provider reason code for the latest state change
    pub state_change_reason_code: Option<String>,

    /// Human readable reason for the latest state change
    pub state_change_reason_message: Option<String>,
}

impl ClusterInfo {
    /// Minimal record for a freshly requested cluster
    pub fn new(jobflow_id: JobflowId, state: ClusterStatus, creation_time: DateTime<Utc>) -> Self {
        Self {
            jobflow_id,
            state,
            creation_time,
            ready_time: None,
            end_time: None,
            public_address: None,
            state_change_reason_code: None,
            state_change_reason_message: None,
        }
    }

    /// True when the latest state change carries a failure reason code
    pub fn failed(&self) -> bool {
        self.state_change_reason_code
            .as_deref()
            .map(crate::status::is_failure_reason)
            .unwrap_or(false)
    }
}
