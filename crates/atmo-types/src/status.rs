//! Remote cluster lifecycle vocabulary
//!
//! Both user clusters and job runs track the state reported by the cloud
//! provider. Pending and final states are disjoint; a final state is terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// State change reason codes that mark a final state as a failure
pub const FAILED_STATE_CHANGE_REASONS: [&str; 5] = [
    "INTERNAL_ERROR",
    "VALIDATION_ERROR",
    "INSTANCE_FAILURE",
    "BOOTSTRAP_FAILURE",
    "STEP_FAILURE",
];

/// Remote cluster status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    /// No status fetched yet, or the remote handle was lost
    #[default]
    Unknown,
    Starting,
    Bootstrapping,
    Running,
    Waiting,
    Terminating,
    Terminated,
    TerminatedWithErrors,
    Failed,
}

/// Unrecognised status string
#[derive(Debug, Clone, Error)]
#[error("Unknown cluster status: {0}")]
pub struct UnknownStatus(pub String);

impl ClusterStatus {
    /// States in which the remote cluster exists and may still change
    pub const PENDING: [ClusterStatus; 5] = [
        ClusterStatus::Starting,
        ClusterStatus::Bootstrapping,
        ClusterStatus::Running,
        ClusterStatus::Waiting,
        ClusterStatus::Terminating,
    ];

    /// Terminal states
    pub const FINAL: [ClusterStatus; 3] = [
        ClusterStatus::Terminated,
        ClusterStatus::TerminatedWithErrors,
        ClusterStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Unknown => "UNKNOWN",
            ClusterStatus::Starting => "STARTING",
            ClusterStatus::Bootstrapping => "BOOTSTRAPPING",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Waiting => "WAITING",
            ClusterStatus::Terminating => "TERMINATING",
            ClusterStatus::Terminated => "TERMINATED",
            ClusterStatus::TerminatedWithErrors => "TERMINATED_WITH_ERRORS",
            ClusterStatus::Failed => "FAILED",
        }
    }

    /// Map a provider state string into the vocabulary.
    ///
    /// Anything the provider reports that we do not know maps to `Unknown`
    /// instead of failing the caller.
    pub fn from_remote(state: &str) -> Self {
        state.parse().unwrap_or(ClusterStatus::Unknown)
    }

    pub fn is_final(&self) -> bool {
        Self::FINAL.contains(self)
    }

    pub fn is_pending(&self) -> bool {
        Self::PENDING.contains(self)
    }

    /// Not yet final (includes `Unknown`)
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "UNKNOWN" => ClusterStatus::Unknown,
            "STARTING" => ClusterStatus::Starting,
            "BOOTSTRAPPING" => ClusterStatus::Bootstrapping,
            "RUNNING" => ClusterStatus::Running,
            "WAITING" => ClusterStatus::Waiting,
            "TERMINATING" => ClusterStatus::Terminating,
            "TERMINATED" => ClusterStatus::Terminated,
            "TERMINATED_WITH_ERRORS" => ClusterStatus::TerminatedWithErrors,
            "FAILED" => ClusterStatus::Failed,
            other => return Err(UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Whether a provider state change reason code denotes a failure
pub fn is_failure_reason(code: &str) -> bool {
    FAILED_STATE_CHANGE_REASONS.contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_and_final_are_disjoint() {
        for status in ClusterStatus::PENDING {
            assert!(!ClusterStatus::FINAL.contains(&status));
        }
        assert!(!ClusterStatus::Unknown.is_pending());
        assert!(!ClusterStatus::Unknown.is_final());
        assert!(ClusterStatus::Unknown.is_active());
    }

    #[test]
    fn test_from_remote_maps_known_and_unknown_states() {
        assert_eq!(ClusterStatus::from_remote("WAITING"), ClusterStatus::Waiting);
        assert_eq!(
            ClusterStatus::from_remote("TERMINATED_WITH_ERRORS"),
            ClusterStatus::TerminatedWithErrors
        );
        assert_eq!(ClusterStatus::from_remote("SOMETHING_NEW"), ClusterStatus::Unknown);
    }

    #[test]
    fn test_serde_uses_provider_spelling() {
        let json = serde_json::to_string(&ClusterStatus::TerminatedWithErrors).unwrap();
        assert_eq!(json, "\"TERMINATED_WITH_ERRORS\"");
        for status in ClusterStatus::PENDING.iter().chain(ClusterStatus::FINAL.iter()) {
            assert_eq!(status.as_str().parse::<ClusterStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn test_failure_reasons() {
        assert!(is_failure_reason("BOOTSTRAP_FAILURE"));
        assert!(!is_failure_reason("USER_REQUEST"));
        assert!(!is_failure_reason("ALL_STEPS_COMPLETED"));
    }
}
