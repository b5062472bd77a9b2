//! ATMO Types - Core types for Spark cluster orchestration
//!
//! ATMO lets users provision transient Spark clusters on a cloud provider and
//! schedule recurring notebook jobs that spin up a cluster, run the notebook
//! and tear the cluster down again.
//!
//! ## Key Concepts
//!
//! - **Cluster**: one provisioned remote Spark cluster owned by a user
//! - **SparkJob**: a recurring notebook execution definition
//! - **SparkJobRun**: one concrete execution of a SparkJob, bound to one remote cluster
//! - **ClusterStatus**: the remote lifecycle vocabulary shared by clusters and runs
//!
//! Everything in this crate is pure data and pure predicates. Side effects
//! (provisioning, persistence, notification) live in the crates above it.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cluster;
pub mod ids;
pub mod job;
pub mod remote;
pub mod run;
pub mod status;
pub mod validation;

// Re-export main types
pub use cluster::{
    AlreadyProvisioned, Cluster, ClusterChange, ClusterRequest, ClusterUpdate, DEFAULT_LIFETIME_HOURS,
    MAX_CLUSTER_SIZE, MAX_LIFETIME_HOURS,
};
pub use ids::{ClusterId, JobflowId, RunId, SparkJobId, UserRef};
pub use job::{
    JobChange, JobInterval, ResultVisibility, Schedule, SparkJob, SparkJobForm, MAX_JOB_TIMEOUT_HOURS,
};
pub use remote::ClusterInfo;
pub use run::{AlertReason, RunAlert, RunTransition, SparkJobRun};
pub use status::{is_failure_reason, ClusterStatus, UnknownStatus, FAILED_STATE_CHANGE_REASONS};
pub use validation::{FieldError, ValidationError};
