//! Job runs
//!
//! A SparkJobRun is one execution of a SparkJob on its own remote cluster.
//! Its status mirrors the remote cluster and only moves forward: once final,
//! no remote snapshot can change it again.

use crate::{ClusterInfo, ClusterStatus, JobflowId, RunId, SparkJobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One execution of a scheduled job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkJobRun {
    /// Unique run identifier
    pub id: RunId,

    /// Owning job
    pub spark_job_id: SparkJobId,

    /// Remote handle of the run's cluster, `None` until provisioned
    pub jobflow_id: Option<JobflowId>,

    /// Mirrors the remote cluster status
    pub status: ClusterStatus,

    /// When the run was scheduled
    pub scheduled_at: DateTime<Utc>,

    /// When the remote cluster became ready
    pub started_at: Option<DateTime<Utc>>,

    /// When the remote cluster reached a final state
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure or timeout alert, at most one per run
    pub alert: Option<RunAlert>,
}

/// Why a run alert was raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertReason {
    /// The run exceeded the job timeout and was terminated
    Timeout { timeout_hours: u32 },

    /// The remote cluster ended with a failure reason
    ClusterFailure {
        code: String,
        message: Option<String>,
    },
}

impl AlertReason {
    pub fn code(&self) -> &str {
        match self {
            AlertReason::Timeout { .. } => "TIMEOUT",
            AlertReason::ClusterFailure { code, .. } => code,
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertReason::Timeout { timeout_hours } => {
                write!(f, "the run exceeded its timeout of {} hour(s)", timeout_hours)
            }
            AlertReason::ClusterFailure { code, message } => match message {
                Some(message) => write!(f, "{} ({})", message, code),
                None => write!(f, "{}", code),
            },
        }
    }
}

/// Alert attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAlert {
    pub reason: AlertReason,
    pub created_at: DateTime<Utc>,
    /// Set once the notification went out
    pub mail_sent_at: Option<DateTime<Utc>>,
}

impl RunAlert {
    pub fn new(reason: AlertReason, now: DateTime<Utc>) -> Self {
        Self {
            reason,
            created_at: now,
            mail_sent_at: None,
        }
    }
}

/// Effect of folding a remote snapshot into a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTransition {
    Unchanged,
    Updated,
    /// The run reached a final state with this update
    Finished,
}

impl SparkJobRun {
    /// A freshly scheduled, not yet provisioned run
    pub fn new(spark_job_id: SparkJobId, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: RunId::generate(),
            spark_job_id,
            jobflow_id: None,
            status: ClusterStatus::Unknown,
            scheduled_at,
            started_at: None,
            finished_at: None,
            alert: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Fold a remote snapshot into the run
    pub fn apply_info(&mut self, info: &ClusterInfo, now: DateTime<Utc>) -> RunTransition {
        if self.status.is_final() || self.status == info.state {
            return RunTransition::Unchanged;
        }

        self.status = info.state;

        if matches!(info.state, ClusterStatus::Running | ClusterStatus::Waiting)
            && self.started_at.is_none()
        {
            self.started_at = Some(info.ready_time.unwrap_or(now));
        }

        if !info.state.is_final() {
            return RunTransition::Updated;
        }

        if self.started_at.is_none() {
            self.started_at = info.ready_time;
        }
        self.finished_at = Some(info.end_time.unwrap_or(now));

        if info.failed() {
            self.raise_alert(
                AlertReason::ClusterFailure {
                    code: info.state_change_reason_code.clone().unwrap_or_default(),
                    message: info.state_change_reason_message.clone(),
                },
                now,
            );
        }

        RunTransition::Finished
    }

    /// The remote handle no longer resolves
    pub fn mark_unknown(&mut self) {
        if !self.status.is_final() {
            self.status = ClusterStatus::Unknown;
        }
    }

    /// Attach an alert unless the run already has one. Returns whether a
    /// new alert was attached.
    pub fn raise_alert(&mut self, reason: AlertReason, now: DateTime<Utc>) -> bool {
        if self.alert.is_some() {
            return false;
        }
        self.alert = Some(RunAlert::new(reason, now));
        true
    }

    /// An alert exists whose notification has not gone out yet
    pub fn has_unsent_alert(&self) -> bool {
        self.alert
            .as_ref()
            .map(|alert| alert.mail_sent_at.is_none())
            .unwrap_or(false)
    }

    pub fn mark_alert_sent(&mut self, now: DateTime<Utc>) {
        if let Some(alert) = self.alert.as_mut() {
            alert.mail_sent_at.get_or_insert(now);
        }
    }
}
