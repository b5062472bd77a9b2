//! Scheduled Spark jobs and their due calculation
//!
//! A SparkJob is a recurring notebook execution. Whether it should run at a
//! given instant is a pure function of the job definition, the current time
//! and the job's latest run, see [`SparkJob::schedule`].

use crate::validation::{check_identifier, ValidationError};
use crate::{RunId, SparkJobId, SparkJobRun, UserRef, MAX_CLUSTER_SIZE};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest allowed job timeout
pub const MAX_JOB_TIMEOUT_HOURS: u32 = 24;

/// How often a job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum JobInterval {
    Daily,
    Weekly,
    Monthly,
}

impl JobInterval {
    pub fn hours(&self) -> u32 {
        match self {
            JobInterval::Daily => 24,
            JobInterval::Weekly => 24 * 7,
            JobInterval::Monthly => 24 * 30,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::hours(self.hours() as i64)
    }

    pub fn from_hours(hours: u32) -> Option<Self> {
        match hours {
            24 => Some(JobInterval::Daily),
            168 => Some(JobInterval::Weekly),
            720 => Some(JobInterval::Monthly),
            _ => None,
        }
    }
}

impl TryFrom<u32> for JobInterval {
    type Error = String;

    fn try_from(hours: u32) -> Result<Self, Self::Error> {
        Self::from_hours(hours).ok_or_else(|| format!("unsupported interval: {} hours", hours))
    }
}

impl From<JobInterval> for u32 {
    fn from(interval: JobInterval) -> Self {
        interval.hours()
    }
}

/// Who may read a job's results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultVisibility {
    #[default]
    Private,
    Public,
}

impl ResultVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultVisibility::Private => "private",
            ResultVisibility::Public => "public",
        }
    }
}

impl fmt::Display for ResultVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring notebook job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkJob {
    /// Unique job identifier
    pub id: SparkJobId,

    /// User-chosen name
    pub identifier: String,

    /// Number of workers for each run's cluster
    pub size: u32,

    /// Time between runs
    pub interval: JobInterval,

    /// Hours a single run may take before it is terminated
    pub job_timeout_hours: u32,

    /// First instant the job may run
    pub start_date: DateTime<Utc>,

    /// Last instant the job may run, `None` for open-ended jobs
    pub end_date: Option<DateTime<Utc>>,

    /// Disabled jobs never run
    pub is_enabled: bool,

    /// Storage key of the uploaded notebook
    pub notebook_key: String,

    /// Result bucket selection
    pub result_visibility: ResultVisibility,

    /// Provider image/release label for run clusters
    pub emr_release: String,

    /// Owning user
    pub created_by: UserRef,

    /// Latest run, if any
    pub last_run_id: Option<RunId>,

    /// When the latest run was scheduled
    pub last_run_at: Option<DateTime<Utc>>,

    /// Set once the job was expired past its end date
    pub expired_at: Option<DateTime<Utc>>,

    /// Set once the expiry notification went out
    pub expiry_mail_sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Job definition as submitted by the web layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkJobForm {
    pub identifier: String,
    pub size: u32,
    pub interval_in_hours: u32,
    pub job_timeout: u32,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    pub notebook_key: String,
    #[serde(default)]
    pub result_visibility: ResultVisibility,
    pub emr_release: String,
}

fn default_enabled() -> bool {
    true
}

impl SparkJobForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_identifier(&mut errors, &self.identifier);

        if self.size < 1 || self.size > MAX_CLUSTER_SIZE {
            errors.push("size", format!("must be between 1 and {}", MAX_CLUSTER_SIZE));
        }
        if JobInterval::from_hours(self.interval_in_hours).is_none() {
            errors.push("interval_in_hours", "must be one of 24, 168 or 720");
        }
        if self.job_timeout < 1 || self.job_timeout > MAX_JOB_TIMEOUT_HOURS {
            errors.push(
                "job_timeout",
                format!("must be between 1 and {}", MAX_JOB_TIMEOUT_HOURS),
            );
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.start_date {
                errors.push("end_date", "must not be earlier than the start date");
            }
        }
        if !self.notebook_key.ends_with(".ipynb") {
            errors.push("notebook_key", "must reference a Jupyter notebook (.ipynb)");
        }
        if self.emr_release.trim().is_empty() {
            errors.push("emr_release", "is required");
        }

        errors.into_result()
    }

    fn interval(&self) -> Result<JobInterval, ValidationError> {
        JobInterval::from_hours(self.interval_in_hours)
            .ok_or_else(|| ValidationError::field("interval_in_hours", "must be one of 24, 168 or 720"))
    }
}

/// Outcome of the due check at a given instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// The job should run now
    Due,
    Disabled,
    NotStarted { starts_at: DateTime<Utc> },
    /// The end date has passed
    Expired { ended_at: DateTime<Utc> },
    /// A run is still active
    Running { run_id: RunId },
    NotYetDue { next_run_at: DateTime<Utc> },
}

impl Schedule {
    pub fn is_due(&self) -> bool {
        matches!(self, Schedule::Due)
    }
}

/// A field-scoped change, applied by the store to the latest saved job
#[derive(Debug, Clone, PartialEq)]
pub enum JobChange {
    /// Re-validated user edit
    Edit(SparkJobForm),
    RecordRun {
        run_id: RunId,
        scheduled_at: DateTime<Utc>,
    },
    Expire,
    /// The expiry notification went out
    ExpiryMailed,
}

impl SparkJob {
    /// Build a job from a validated form
    pub fn from_form(form: &SparkJobForm, owner: UserRef, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        form.validate()?;
        Ok(Self {
            id: SparkJobId::generate(),
            identifier: form.identifier.clone(),
            size: form.size,
            interval: form.interval()?,
            job_timeout_hours: form.job_timeout,
            start_date: form.start_date,
            end_date: form.end_date,
            is_enabled: form.is_enabled,
            notebook_key: form.notebook_key.clone(),
            result_visibility: form.result_visibility,
            emr_release: form.emr_release.clone(),
            created_by: owner,
            last_run_id: None,
            last_run_at: None,
            expired_at: None,
            expiry_mail_sent_at: None,
            created_at: now,
            modified_at: now,
        })
    }

    /// Apply an edited form. Moving the end date into the future revives an
    /// expired job.
    pub fn apply_form(&mut self, form: &SparkJobForm, now: DateTime<Utc>) -> Result<(), ValidationError> {
        form.validate()?;
        self.identifier = form.identifier.clone();
        self.size = form.size;
        self.interval = form.interval()?;
        self.job_timeout_hours = form.job_timeout;
        self.start_date = form.start_date;
        self.end_date = form.end_date;
        self.is_enabled = form.is_enabled;
        self.notebook_key = form.notebook_key.clone();
        self.result_visibility = form.result_visibility;
        self.emr_release = form.emr_release.clone();

        if self.expired_at.is_some() && !self.is_lapsed(now) {
            self.expired_at = None;
            self.expiry_mail_sent_at = None;
        }
        self.modified_at = now;
        Ok(())
    }

    /// The end date has passed
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.end_date.map(|end| now > end).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.expired_at.is_some()
    }

    /// Due check at `now`, given the job's latest run.
    ///
    /// All of these must hold for a job to be due: enabled, started, not
    /// past its end date, no active run, and at least one interval since
    /// the latest run was scheduled.
    pub fn schedule(&self, now: DateTime<Utc>, latest_run: Option<&SparkJobRun>) -> Schedule {
        if let Some(ended_at) = self.end_date.filter(|_| self.is_lapsed(now)) {
            return Schedule::Expired { ended_at };
        }
        if !self.is_enabled {
            return Schedule::Disabled;
        }
        if self.start_date > now {
            return Schedule::NotStarted {
                starts_at: self.start_date,
            };
        }
        if let Some(run) = latest_run.filter(|run| run.is_active()) {
            return Schedule::Running { run_id: run.id };
        }

        let last_scheduled = latest_run.map(|run| run.scheduled_at).or(self.last_run_at);
        match last_scheduled {
            Some(last) if now - last < self.interval.duration() => Schedule::NotYetDue {
                next_run_at: last + self.interval.duration(),
            },
            _ => Schedule::Due,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, latest_run: Option<&SparkJobRun>) -> bool {
        self.schedule(now, latest_run).is_due()
    }

    /// Next instant the job becomes due, ignoring active runs
    pub fn next_run_at(&self) -> DateTime<Utc> {
        match self.last_run_at {
            Some(last) => (last + self.interval.duration()).max(self.start_date),
            None => self.start_date,
        }
    }

    /// An active run has been going for longer than the job timeout
    pub fn has_timed_out(&self, run: &SparkJobRun, now: DateTime<Utc>) -> bool {
        run.is_active() && now - run.scheduled_at > self.timeout()
    }

    pub fn timeout(&self) -> Duration {
        Duration::hours(self.job_timeout_hours as i64)
    }

    /// Record a newly scheduled run as the latest one
    pub fn record_run(&mut self, run_id: RunId, scheduled_at: DateTime<Utc>) -> bool {
        if self.last_run_id == Some(run_id) {
            return false;
        }
        self.last_run_id = Some(run_id);
        self.last_run_at = Some(scheduled_at);
        self.modified_at = scheduled_at;
        true
    }

    /// Mark the job expired. Returns false if it already was.
    pub fn expire(&mut self, now: DateTime<Utc>) -> bool {
        if self.expired_at.is_some() {
            return false;
        }
        self.expired_at = Some(now);
        self.modified_at = now;
        true
    }

    /// Apply a change to the latest saved job.
    ///
    /// Expiry is re-checked against the current end date, so an edit that
    /// moved it into the future wins over a sweep that saw the old one.
    pub fn apply_change(&mut self, change: &JobChange, now: DateTime<Utc>) -> bool {
        match change {
            JobChange::Edit(form) => self.apply_form(form, now).is_ok(),
            JobChange::RecordRun {
                run_id,
                scheduled_at,
            } => self.record_run(*run_id, *scheduled_at),
            JobChange::Expire => self.is_lapsed(now) && self.expire(now),
            JobChange::ExpiryMailed => {
                if self.expired_at.is_none() || self.expiry_mail_sent_at.is_some() {
                    return false;
                }
                self.expiry_mail_sent_at = Some(now);
                self.modified_at = now;
                true
            }
        }
    }
}
