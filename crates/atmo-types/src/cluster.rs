//! User-provisioned Spark clusters
//!
//! A Cluster follows the remote lifecycle `UNKNOWN -> pending -> final`.
//! The remote handle is assigned once, on the first successful provisioning
//! call, and never changes afterwards.

use crate::validation::{check_identifier, ValidationError};
use crate::{ClusterId, ClusterInfo, ClusterStatus, JobflowId, UserRef};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of workers a user may request
pub const MAX_CLUSTER_SIZE: u32 = 20;

/// Lifetime applied when the request does not specify one
pub const DEFAULT_LIFETIME_HOURS: u32 = 24;

/// Upper bound for a lifetime or a single extension
pub const MAX_LIFETIME_HOURS: u32 = 24;

/// Expiry warnings go out once a cluster has less than this left
const EXPIRY_WARNING_WINDOW_HOURS: i64 = 1;

/// A provisioned (or being provisioned) Spark cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cluster identifier
    pub id: ClusterId,

    /// User-chosen name, not unique
    pub identifier: String,

    /// Number of workers
    pub size: u32,

    /// Public key authorized for SSH access
    pub public_key: String,

    /// Provider image/release label
    pub emr_release: String,

    /// Owning user
    pub created_by: UserRef,

    /// When the cluster was started
    pub start_date: Option<DateTime<Utc>>,

    /// When the cluster expires and gets terminated
    pub end_date: Option<DateTime<Utc>>,

    /// Remote handle, `None` until provisioned
    pub jobflow_id: Option<JobflowId>,

    /// Most recently retrieved remote status
    pub most_recent_status: ClusterStatus,

    /// Public address of the coordinator node, empty until bootstrapped
    pub master_address: String,

    /// Whether the expiry warning for the current end date went out
    pub expiration_mail_sent: bool,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Second attempt at assigning a remote handle
#[derive(Debug, Clone, Error)]
#[error("Cluster {cluster_id} is already provisioned as {jobflow_id}")]
pub struct AlreadyProvisioned {
    pub cluster_id: ClusterId,
    pub jobflow_id: JobflowId,
}

/// New cluster request as submitted by the web layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub identifier: String,
    pub size: u32,
    pub public_key: String,
    pub emr_release: String,
    #[serde(default)]
    pub lifetime_hours: Option<u32>,
}

impl ClusterRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_identifier(&mut errors, &self.identifier);

        if self.size < 1 || self.size > MAX_CLUSTER_SIZE {
            errors.push(
                "size",
                format!("must be between 1 and {}", MAX_CLUSTER_SIZE),
            );
        }

        let key = self.public_key.trim();
        if key.is_empty() {
            errors.push("public_key", "is required");
        } else if !key.starts_with("ssh-") && !key.starts_with("ecdsa-") {
            errors.push("public_key", "is not a valid SSH public key");
        }

        if self.emr_release.trim().is_empty() {
            errors.push("emr_release", "is required");
        }

        if let Some(hours) = self.lifetime_hours {
            if hours < 1 || hours > MAX_LIFETIME_HOURS {
                errors.push(
                    "lifetime_hours",
                    format!("must be between 1 and {}", MAX_LIFETIME_HOURS),
                );
            }
        }

        errors.into_result()
    }

    pub fn lifetime(&self) -> Duration {
        Duration::hours(self.lifetime_hours.unwrap_or(DEFAULT_LIFETIME_HOURS) as i64)
    }
}

/// Partial update of a cluster's user-editable fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterUpdate {
    #[serde(default)]
    pub identifier: Option<String>,
}

impl ClusterUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        if let Some(identifier) = &self.identifier {
            check_identifier(&mut errors, identifier);
        }
        errors.into_result()
    }
}

/// A field-scoped change, applied by the store to the latest saved record.
///
/// Status updates from reconciliation and edits from users touch disjoint
/// fields, so applying them to the current record never reverts the other
/// side's write.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterChange {
    /// Fold a remote snapshot in
    Remote(ClusterInfo),
    /// The remote handle no longer resolves
    Unknown,
    /// A requested stop found the remote cluster already gone
    Stopped,
    /// Expiry warning went out for this end date
    ExpiryWarned { end_date: Option<DateTime<Utc>> },
    Rename(String),
    Extend { hours: u32 },
}

impl Cluster {
    /// Build an unprovisioned cluster from a validated request
    pub fn from_request(request: &ClusterRequest, owner: UserRef, now: DateTime<Utc>) -> Self {
        Self {
            id: ClusterId::generate(),
            identifier: request.identifier.clone(),
            size: request.size,
            public_key: request.public_key.trim().to_string(),
            emr_release: request.emr_release.clone(),
            created_by: owner,
            start_date: Some(now),
            end_date: Some(now + request.lifetime()),
            jobflow_id: None,
            most_recent_status: ClusterStatus::Unknown,
            master_address: String::new(),
            expiration_mail_sent: false,
            created_at: now,
            modified_at: now,
        }
    }

    /// Record the remote handle. Only the first assignment succeeds.
    pub fn assign_jobflow_id(&mut self, jobflow_id: JobflowId) -> Result<(), AlreadyProvisioned> {
        if let Some(existing) = &self.jobflow_id {
            return Err(AlreadyProvisioned {
                cluster_id: self.id,
                jobflow_id: existing.clone(),
            });
        }
        self.jobflow_id = Some(jobflow_id);
        Ok(())
    }

    /// Fold a remote snapshot into the local record.
    ///
    /// Final states are terminal and the master address is sticky: once
    /// known it is never cleared. Returns whether anything changed.
    pub fn apply_info(&mut self, info: &ClusterInfo) -> bool {
        if self.most_recent_status.is_final() {
            return false;
        }

        let mut changed = false;
        if self.most_recent_status != info.state {
            self.most_recent_status = info.state;
            changed = true;
        }

        if let Some(address) = info.public_address.as_deref().filter(|a| !a.is_empty()) {
            if self.master_address != address {
                self.master_address = address.to_string();
                changed = true;
            }
        }

        changed
    }

    /// The remote handle no longer resolves. Returns whether the status changed.
    pub fn mark_unknown(&mut self) -> bool {
        if self.most_recent_status.is_final() || self.most_recent_status == ClusterStatus::Unknown {
            return false;
        }
        self.most_recent_status = ClusterStatus::Unknown;
        true
    }

    /// Apply a change and bump `modified_at` if anything moved.
    ///
    /// An extension that is no longer valid, or an expiry warning recorded
    /// for an end date that has since changed, is dropped.
    pub fn apply_change(&mut self, change: &ClusterChange, now: DateTime<Utc>) -> bool {
        let changed = match change {
            ClusterChange::Remote(info) => self.apply_info(info),
            ClusterChange::Unknown => self.mark_unknown(),
            ClusterChange::Stopped => {
                if self.most_recent_status.is_final() {
                    false
                } else {
                    self.most_recent_status = ClusterStatus::Terminated;
                    true
                }
            }
            ClusterChange::ExpiryWarned { end_date } => {
                if self.expiration_mail_sent || self.end_date != *end_date {
                    false
                } else {
                    self.expiration_mail_sent = true;
                    true
                }
            }
            ClusterChange::Rename(identifier) => {
                if &self.identifier == identifier {
                    false
                } else {
                    self.identifier = identifier.clone();
                    true
                }
            }
            ClusterChange::Extend { hours } => self.extend(*hours, now).is_ok(),
        };

        if changed {
            self.modified_at = now;
        }
        changed
    }

    pub fn is_active(&self) -> bool {
        self.most_recent_status.is_active()
    }

    pub fn is_terminating(&self) -> bool {
        self.most_recent_status == ClusterStatus::Terminating
    }

    pub fn is_ready(&self) -> bool {
        self.most_recent_status == ClusterStatus::Waiting
    }

    /// End date within the next hour
    pub fn is_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        self.end_date
            .map(|end| end <= now + Duration::hours(EXPIRY_WARNING_WINDOW_HOURS))
            .unwrap_or(false)
    }

    /// End date has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date.map(|end| end <= now).unwrap_or(false)
    }

    /// Active, inside the warning window, not yet expired and not yet warned
    pub fn needs_expiry_warning(&self, now: DateTime<Utc>) -> bool {
        self.is_active()
            && !self.expiration_mail_sent
            && self.is_expiring_soon(now)
            && !self.is_expired(now)
    }

    /// Push the end date out and re-arm the expiry warning
    pub fn extend(&mut self, hours: u32, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if hours < 1 || hours > MAX_LIFETIME_HOURS {
            return Err(ValidationError::field(
                "hours",
                format!("must be between 1 and {}", MAX_LIFETIME_HOURS),
            ));
        }
        if !self.is_active() {
            return Err(ValidationError::field(
                "cluster",
                "only active clusters can be extended",
            ));
        }

        let start = self.start_date.unwrap_or(now);
        let base = self.end_date.unwrap_or(now).max(start);
        self.end_date = Some(base + Duration::hours(hours as i64));
        self.expiration_mail_sent = false;
        self.modified_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 4, 5, 13, 25, 47).unwrap()
    }

    fn request() -> ClusterRequest {
        ClusterRequest {
            identifier: "jdoe-analysis".to_string(),
            size: 3,
            public_key: "ssh-rsa AAAAB3NzaC1yc2E jdoe@laptop".to_string(),
            emr_release: "5.2.1".to_string(),
            lifetime_hours: None,
        }
    }

    fn cluster() -> Cluster {
        Cluster::from_request(&request(), UserRef::new("jdoe@example.com"), now())
    }

    #[test]
    fn test_request_validation() {
        assert!(request().validate().is_ok());

        let mut bad = request();
        bad.size = 21;
        bad.public_key = "not a key".to_string();
        bad.identifier = "bad name!".to_string();
        bad.lifetime_hours = Some(0);
        let err = bad.validate().unwrap_err();
        assert!(err.has_field("size"));
        assert!(err.has_field("public_key"));
        assert!(err.has_field("identifier"));
        assert!(err.has_field("lifetime_hours"));

        let mut zero = request();
        zero.size = 0;
        assert!(zero.validate().unwrap_err().has_field("size"));
    }

    #[test]
    fn test_new_cluster_dates() {
        let cluster = cluster();
        assert_eq!(cluster.start_date, Some(now()));
        assert_eq!(cluster.end_date, Some(now() + Duration::hours(24)));
        assert_eq!(cluster.most_recent_status, ClusterStatus::Unknown);
        assert!(cluster.end_date >= cluster.start_date);
    }

    #[test]
    fn test_jobflow_id_assigned_once() {
        let mut cluster = cluster();
        cluster.assign_jobflow_id(JobflowId::new("j-1")).unwrap();
        let err = cluster.assign_jobflow_id(JobflowId::new("j-2")).unwrap_err();
        assert_eq!(err.jobflow_id, JobflowId::new("j-1"));
        assert_eq!(cluster.jobflow_id, Some(JobflowId::new("j-1")));
    }

    #[test]
    fn test_master_address_is_sticky() {
        let mut cluster = cluster();
        let mut info = ClusterInfo::new(JobflowId::new("j-1"), ClusterStatus::Waiting, now());
        info.public_address = Some("ec2-1-2-3-4.compute.amazonaws.com".to_string());
        assert!(cluster.apply_info(&info));
        assert!(cluster.is_ready());

        info.state = ClusterStatus::Terminating;
        info.public_address = None;
        assert!(cluster.apply_info(&info));
        assert_eq!(cluster.master_address, "ec2-1-2-3-4.compute.amazonaws.com");
    }

    #[test]
    fn test_final_status_never_regresses() {
        let mut cluster = cluster();
        let info = ClusterInfo::new(JobflowId::new("j-1"), ClusterStatus::Terminated, now());
        assert!(cluster.apply_info(&info));

        let again = ClusterInfo::new(JobflowId::new("j-1"), ClusterStatus::Running, now());
        assert!(!cluster.apply_info(&again));
        cluster.mark_unknown();
        assert_eq!(cluster.most_recent_status, ClusterStatus::Terminated);
    }

    #[test]
    fn test_expiry_predicates() {
        let mut cluster = cluster();
        cluster.end_date = Some(now() + Duration::hours(1));
        assert!(cluster.is_expiring_soon(now()));
        assert!(cluster.needs_expiry_warning(now()));
        assert!(!cluster.is_expired(now()));

        cluster.end_date = Some(now() + Duration::hours(2));
        assert!(!cluster.is_expiring_soon(now()));

        cluster.end_date = Some(now() - Duration::minutes(1));
        assert!(cluster.is_expired(now()));
        assert!(!cluster.needs_expiry_warning(now()));
    }

    #[test]
    fn test_extend_rearms_warning() {
        let mut cluster = cluster();
        cluster.end_date = Some(now() + Duration::minutes(30));
        cluster.expiration_mail_sent = true;

        cluster.extend(2, now()).unwrap();
        assert_eq!(cluster.end_date, Some(now() + Duration::minutes(150)));
        assert!(!cluster.expiration_mail_sent);
        assert!(cluster.end_date >= cluster.start_date);

        assert!(cluster.extend(25, now()).is_err());
        cluster.most_recent_status = ClusterStatus::Terminated;
        assert!(cluster.extend(1, now()).is_err());
    }

    #[test]
    fn test_status_change_keeps_user_fields() {
        let mut cluster = cluster();
        cluster.most_recent_status = ClusterStatus::Waiting;
        let later = now() + Duration::minutes(5);

        assert!(cluster.apply_change(&ClusterChange::Extend { hours: 10 }, later));
        let extended = cluster.end_date;

        let info = ClusterInfo::new(JobflowId::new("j-1"), ClusterStatus::Running, now());
        assert!(cluster.apply_change(&ClusterChange::Remote(info), later));
        assert_eq!(cluster.end_date, extended);
        assert_eq!(cluster.modified_at, later);
    }

    #[test]
    fn test_expiry_warning_tied_to_end_date() {
        let mut cluster = cluster();
        let seen = cluster.end_date;
        cluster.extend(1, now()).unwrap();

        assert!(!cluster.apply_change(&ClusterChange::ExpiryWarned { end_date: seen }, now()));
        assert!(!cluster.expiration_mail_sent);

        let current = cluster.end_date;
        assert!(cluster.apply_change(&ClusterChange::ExpiryWarned { end_date: current }, now()));
        assert!(cluster.expiration_mail_sent);
    }

    #[test]
    fn test_stopped_closes_vanished_cluster() {
        let mut cluster = cluster();
        assert!(cluster.apply_change(&ClusterChange::Stopped, now()));
        assert_eq!(cluster.most_recent_status, ClusterStatus::Terminated);
        assert!(!cluster.is_active());
        assert!(!cluster.apply_change(&ClusterChange::Stopped, now()));
        assert!(!cluster.apply_change(&ClusterChange::Unknown, now()));
    }
}
