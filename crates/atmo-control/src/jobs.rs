//! Scheduled job operations

use crate::error::{ControlError, Result};
use crate::orchestrator::{Orchestrator, RunOutcome};
use atmo_provisioning::{ClusterSpec, JobStep};
use atmo_store::StorageError;
use atmo_types::{JobChange, Schedule, SparkJob, SparkJobForm, SparkJobId, SparkJobRun, UserRef};
use tracing::{debug, info, instrument, warn};

impl Orchestrator {
    // ========== Job definitions ==========

    #[instrument(skip(self, form), fields(identifier = %form.identifier, user = %user))]
    pub async fn create_job(&self, form: SparkJobForm, user: &UserRef) -> Result<SparkJob> {
        let job = SparkJob::from_form(&form, user.clone(), self.clock.now())?;
        self.storage.upsert_job(job.clone()).await?;

        info!(job_id = %job.id, start_date = %job.start_date, "Spark job created");
        Ok(job)
    }

    /// Re-validate and apply an edited form. Moving the end date into the
    /// future makes an expired job schedulable again.
    #[instrument(skip(self, form), fields(user = %user))]
    pub async fn edit_job(
        &self,
        id: &SparkJobId,
        user: &UserRef,
        form: SparkJobForm,
    ) -> Result<SparkJob> {
        let mut preview = self.owned_job(id, user).await?;
        preview.apply_form(&form, self.clock.now())?;

        let job = self.change_job(id, JobChange::Edit(form)).await?;
        info!(job_id = %job.id, "Spark job updated");
        Ok(job)
    }

    pub async fn get_job(&self, id: &SparkJobId, user: &UserRef) -> Result<SparkJob> {
        self.owned_job(id, user).await
    }

    pub async fn list_jobs(&self, user: &UserRef) -> Result<Vec<SparkJob>> {
        Ok(self.storage.list_jobs_for_user(user).await?)
    }

    pub async fn list_runs(&self, id: &SparkJobId, user: &UserRef) -> Result<Vec<SparkJobRun>> {
        let job = self.owned_job(id, user).await?;
        Ok(self.storage.list_runs_for_job(&job.id).await?)
    }

    /// Due check for a job at the current instant
    pub async fn job_schedule(&self, job: &SparkJob) -> Result<Schedule> {
        let latest = self.storage.latest_run(&job.id).await?;
        Ok(job.schedule(self.clock.now(), latest.as_ref()))
    }

    /// Stop any active run, then drop the job and its history
    #[instrument(skip(self), fields(user = %user))]
    pub async fn delete_job(&self, id: &SparkJobId, user: &UserRef) -> Result<()> {
        let job = self.owned_job(id, user).await?;

        if let Some(mut run) = self.storage.latest_run(&job.id).await? {
            if run.is_active() {
                self.terminate_run(&mut run).await?;
                self.storage.update_run(run).await?;
            }
        }

        if !self.storage.delete_job(&job.id).await? {
            return Err(ControlError::job_not_found(id));
        }
        info!(job_id = %id, "Spark job deleted");
        Ok(())
    }

    // ========== Runs ==========

    /// Manual trigger. Skips the schedule but never starts a second
    /// concurrent run.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn run_job_now(&self, id: &SparkJobId, user: &UserRef) -> Result<RunOutcome> {
        let job = self.owned_job(id, user).await?;
        self.run(&job).await
    }

    /// Start a new run of `job` unless one is already active.
    ///
    /// The run row is inserted before the remote call so the storage layer
    /// arbitrates concurrent triggers; the loser gets `AlreadyRunning`. A
    /// provisioning failure removes the row again.
    pub async fn run(&self, job: &SparkJob) -> Result<RunOutcome> {
        if let Some(latest) = self.storage.latest_run(&job.id).await? {
            if latest.is_active() {
                debug!(job_id = %job.id, run_id = %latest.id, "Run already active");
                return Ok(RunOutcome::AlreadyRunning);
            }
        }

        let now = self.clock.now();
        let mut run = SparkJobRun::new(job.id, now);
        match self.storage.insert_run(run.clone()).await {
            Ok(()) => {}
            Err(StorageError::Conflict(reason)) => {
                debug!(job_id = %job.id, reason = %reason, "Run reservation lost");
                return Ok(RunOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        }

        let spec = ClusterSpec {
            owner_email: job.created_by.email().to_string(),
            identifier: job.identifier.clone(),
            size: job.size,
            public_key: None,
            emr_release: job.emr_release.clone(),
            job: Some(JobStep {
                notebook_key: job.notebook_key.clone(),
                result_visibility: job.result_visibility,
                job_timeout_hours: job.job_timeout_hours,
            }),
        };

        let jobflow_id = match self.provisioner.start(&spec).await {
            Ok(jobflow_id) => jobflow_id,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to provision run cluster");
                self.release_run(&run.id).await;
                return Err(e.into());
            }
        };
        run.jobflow_id = Some(jobflow_id.clone());

        match self.describe(&jobflow_id).await {
            Ok(Some(remote)) => {
                run.apply_info(&remote, now);
            }
            Ok(None) => run.mark_unknown(),
            Err(e) => warn!(run_id = %run.id, error = %e, "Initial run status refresh failed"),
        }

        if let Err(e) = self.storage.update_run(run.clone()).await {
            self.abandon_cluster(&jobflow_id).await;
            self.release_run(&run.id).await;
            return Err(e.into());
        }

        self.change_job(
            &job.id,
            JobChange::RecordRun {
                run_id: run.id,
                scheduled_at: run.scheduled_at,
            },
        )
        .await?;

        if let Some(metrics) = self.metrics() {
            metrics.record_run_started(&job.emr_release);
        }
        info!(
            job_id = %job.id,
            run_id = %run.id,
            jobflow_id = %jobflow_id,
            "Spark job run started"
        );
        Ok(RunOutcome::Started(run))
    }

    /// Retire a job past its end date: stop its active run and take it out
    /// of scheduling. Returns false if it was already expired or its end
    /// date has moved into the future since it was read.
    pub async fn expire(&self, job: &SparkJob) -> Result<bool> {
        let now = self.clock.now();
        if job.is_expired() || !job.is_lapsed(now) {
            return Ok(false);
        }

        if let Some(mut run) = self.storage.latest_run(&job.id).await? {
            if run.is_active() {
                self.terminate_run(&mut run).await?;
                self.storage.update_run(run).await?;
            }
        }

        let updated = self
            .storage
            .change_job(&job.id, &JobChange::Expire, now)
            .await?;
        if !updated.changed {
            return Ok(false);
        }

        if let Some(metrics) = self.metrics() {
            metrics.jobs_expired_total.inc();
        }
        info!(job_id = %job.id, "Spark job expired");
        Ok(true)
    }

    /// Apply a change to the saved job and return the result
    pub(crate) async fn change_job(&self, id: &SparkJobId, change: JobChange) -> Result<SparkJob> {
        let updated = self.storage.change_job(id, &change, self.clock.now()).await?;
        Ok(updated.record)
    }
}
