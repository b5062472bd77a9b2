//! Error types for the orchestrator

use atmo_provisioning::ProvisioningError;
use atmo_store::StorageError;
use atmo_types::{AlreadyProvisioned, ClusterId, SparkJobId, UserRef, ValidationError};
use thiserror::Error;

/// Orchestrator error type
#[derive(Debug, Error)]
pub enum ControlError {
    /// Bad user input, rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The cloud provider rejected or failed a request
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Persistence failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote handle was assigned twice
    #[error(transparent)]
    AlreadyProvisioned(#[from] AlreadyProvisioned),

    /// The acting user does not own the entity
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, ControlError>;

impl ControlError {
    pub fn cluster_not_found(id: &ClusterId) -> Self {
        Self::NotFound(format!("Cluster {}", id))
    }

    pub fn job_not_found(id: &SparkJobId) -> Self {
        Self::NotFound(format!("Spark job {}", id))
    }

    pub fn not_owner(user: &UserRef, what: impl std::fmt::Display) -> Self {
        Self::PermissionDenied(format!("{} does not own {}", user, what))
    }
}
