//! Reconciliation sweeps
//!
//! Each step walks its entities one by one. A failure on one entity is
//! logged with its id and counted; the step carries on with the rest.
//! Every step is idempotent and may be re-run at any time. Decisions are
//! made on a fresh read of each entity and written back as field-scoped
//! changes.

use crate::error::{ControlError, Result};
use crate::orchestrator::Orchestrator;
use atmo_types::{
    AlertReason, Cluster, ClusterChange, ClusterId, ClusterInfo, ClusterStatus, JobChange,
    JobflowId, RunId, RunTransition, SparkJobId, SparkJobRun,
};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Outcome of one sweep step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entities looked at
    pub examined: usize,
    /// Entities changed or acted upon
    pub acted: usize,
    /// Entities skipped because of an error
    pub failed: usize,
}

impl SweepReport {
    fn record<T>(
        &mut self,
        result: Result<T>,
        acted: impl FnOnce(&T) -> bool,
        what: &str,
        id: &dyn std::fmt::Display,
    ) {
        self.examined += 1;
        match result {
            Ok(value) => {
                if acted(&value) {
                    self.acted += 1;
                }
            }
            Err(e) => {
                self.failed += 1;
                error!(entity = %id, error = %e, "{} failed", what);
            }
        }
    }
}

/// Outcome of the status sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// `(job identifier, run id)` for every run whose status changed
    pub runs_updated: Vec<(String, RunId)>,
    pub clusters: SweepReport,
}

/// Outcome of the maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub status: StatusReport,
    pub timed_out: SweepReport,
    pub expired_jobs: SweepReport,
    pub launched: SweepReport,
    pub run_alert_mails: SweepReport,
    pub expired_mails: SweepReport,
    pub expired_clusters: SweepReport,
}

/// Midnight UTC of the given instant's day
fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

impl Orchestrator {
    // ========== Passes ==========

    /// Frequent pass: mirror remote state into runs and clusters
    pub async fn status_pass(&self) -> StatusReport {
        let runs_updated = match self.sync_runs().await {
            Ok(updated) => updated,
            Err(e) => {
                error!(error = %e, "Run status sync failed");
                Vec::new()
            }
        };
        let clusters = match self.sync_clusters().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Cluster status sync failed");
                SweepReport::default()
            }
        };

        StatusReport {
            runs_updated,
            clusters,
        }
    }

    /// Hourly pass: every reconciliation step in order
    pub async fn maintenance_pass(&self) -> MaintenanceReport {
        let status = self.status_pass().await;

        let report = MaintenanceReport {
            status,
            timed_out: self.step("terminate_and_notify", self.terminate_and_notify().await),
            expired_jobs: self.step("unschedule_and_expire", self.unschedule_and_expire().await),
            launched: self.step("launch_due_jobs", self.launch_due_jobs().await),
            run_alert_mails: self.step("send_run_alert_mails", self.send_run_alert_mails().await),
            expired_mails: self.step("send_expired_mails", self.send_expired_mails().await),
            expired_clusters: self.step("expire_clusters", self.expire_clusters().await),
        };

        info!(
            runs_updated = report.status.runs_updated.len(),
            timed_out = report.timed_out.acted,
            expired_jobs = report.expired_jobs.acted,
            launched = report.launched.acted,
            expired_clusters = report.expired_clusters.acted,
            "Maintenance pass complete"
        );
        report
    }

    fn step(&self, name: &str, result: Result<SweepReport>) -> SweepReport {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(step = %name, error = %e, "Sweep step failed");
                SweepReport::default()
            }
        };
        if let Some(metrics) = self.metrics() {
            metrics.record_sweep_failures(name, report.failed);
        }
        report
    }

    // ========== Status sync ==========

    /// Fetch remote states in bulk, falling back to one describe call for
    /// handles the bulk listing did not return. A failed listing falls back
    /// to describing every handle. Handles that cannot be described are
    /// left out.
    async fn remote_states(
        &self,
        handles: &[JobflowId],
        created_after: DateTime<Utc>,
    ) -> HashMap<JobflowId, Option<ClusterInfo>> {
        let mut listed: HashMap<JobflowId, ClusterInfo> =
            match self.provisioner.list(created_after).await {
                Ok(infos) => infos
                    .into_iter()
                    .map(|info| (info.jobflow_id.clone(), info))
                    .collect(),
                Err(e) => {
                    warn!(error = %e, handles = handles.len(), "Bulk cluster listing failed, describing one by one");
                    HashMap::new()
                }
            };

        let mut states = HashMap::with_capacity(handles.len());
        for handle in handles {
            let state = match listed.remove(handle) {
                Some(info) => Some(info),
                None => match self.describe(handle).await {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(jobflow_id = %handle, error = %e, "Cannot describe cluster");
                        continue;
                    }
                },
            };
            states.insert(handle.clone(), state);
        }
        states
    }

    /// Mirror remote status into every active run.
    ///
    /// Uses one bulk listing starting at midnight of the earliest active
    /// run's schedule date. Returns `(job identifier, run id)` for each run
    /// whose status changed.
    pub async fn sync_runs(&self) -> Result<Vec<(String, RunId)>> {
        let runs = self.storage.list_active_runs().await?;
        let provisioned: Vec<_> = runs.into_iter().filter(|r| r.jobflow_id.is_some()).collect();
        let Some(earliest) = provisioned.iter().map(|r| r.scheduled_at).min() else {
            return Ok(Vec::new());
        };

        let handles: Vec<JobflowId> = provisioned.iter().filter_map(|r| r.jobflow_id.clone()).collect();
        let states = self.remote_states(&handles, start_of_day(earliest)).await;

        let now = self.clock.now();
        let mut identifiers: HashMap<SparkJobId, String> = HashMap::new();
        let mut updated = Vec::new();

        for mut run in provisioned {
            let Some(handle) = run.jobflow_id.clone() else {
                continue;
            };
            let Some(state) = states.get(&handle) else {
                continue;
            };

            let transition = match state {
                Some(info) => run.apply_info(info, now),
                None if run.status != ClusterStatus::Unknown => {
                    run.mark_unknown();
                    RunTransition::Updated
                }
                None => RunTransition::Unchanged,
            };
            if transition == RunTransition::Unchanged {
                continue;
            }

            if let Err(e) = self.storage.update_run(run.clone()).await {
                error!(run_id = %run.id, error = %e, "Failed to store run status");
                continue;
            }

            if transition == RunTransition::Finished {
                info!(run_id = %run.id, status = %run.status, "Spark job run finished");
            }

            let identifier = match identifiers.get(&run.spark_job_id) {
                Some(identifier) => identifier.clone(),
                None => {
                    let identifier = match self.storage.get_job(&run.spark_job_id).await {
                        Ok(Some(job)) => job.identifier,
                        _ => run.spark_job_id.to_string(),
                    };
                    identifiers.insert(run.spark_job_id, identifier.clone());
                    identifier
                }
            };
            updated.push((identifier, run.id));
        }

        debug!(updated = updated.len(), "Run statuses synced");
        Ok(updated)
    }

    /// Mirror remote status into every active user cluster
    pub async fn sync_clusters(&self) -> Result<SweepReport> {
        let clusters = self.storage.list_active_clusters().await?;
        let mut report = SweepReport::default();
        let Some(earliest) = clusters.iter().map(|c| c.created_at).min() else {
            return Ok(report);
        };

        let handles: Vec<JobflowId> = clusters.iter().filter_map(|c| c.jobflow_id.clone()).collect();
        let states = self.remote_states(&handles, start_of_day(earliest)).await;

        for cluster in clusters {
            let Some(handle) = cluster.jobflow_id.clone() else {
                continue;
            };
            let result = match states.get(&handle) {
                Some(state) => self.sync_cluster(&cluster, &handle, state.as_ref()).await,
                None => Err(ControlError::NotFound(format!("no remote state for {}", handle))),
            };
            report.record(result, |changed| *changed, "Cluster status sync", &cluster.id);
        }

        Ok(report)
    }

    async fn sync_cluster(
        &self,
        cluster: &Cluster,
        handle: &JobflowId,
        state: Option<&ClusterInfo>,
    ) -> Result<bool> {
        let change = match state {
            Some(info) => {
                // Bulk listings carry no address
                let needs_address = cluster.master_address.is_empty()
                    && info.public_address.is_none()
                    && matches!(info.state, ClusterStatus::Running | ClusterStatus::Waiting);
                let info = if needs_address {
                    self.describe(handle).await?.unwrap_or_else(|| info.clone())
                } else {
                    info.clone()
                };
                ClusterChange::Remote(info)
            }
            None => ClusterChange::Unknown,
        };

        let updated = self
            .storage
            .change_cluster(&cluster.id, &change, self.clock.now())
            .await?;
        Ok(updated.changed)
    }

    // ========== Maintenance ==========

    /// Stop runs that outlived their job timeout and attach a timeout alert
    pub async fn terminate_and_notify(&self) -> Result<SweepReport> {
        let runs = self.storage.list_active_runs().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for mut run in runs {
            let result = self.check_run_timeout(&mut run, now).await;
            report.record(result, |changed| *changed, "Run timeout check", &run.id);
        }

        Ok(report)
    }

    async fn check_run_timeout(&self, run: &mut SparkJobRun, now: DateTime<Utc>) -> Result<bool> {
        let Some(job) = self.storage.get_job(&run.spark_job_id).await? else {
            return Ok(false);
        };
        if !job.has_timed_out(run, now) {
            return Ok(false);
        }

        let mut changed = false;
        if run.status != ClusterStatus::Terminating {
            warn!(
                run_id = %run.id,
                job_id = %job.id,
                timeout_hours = job.job_timeout_hours,
                "Run exceeded its timeout, terminating"
            );
            self.terminate_run(run).await?;
            if let Some(metrics) = self.metrics() {
                metrics.run_timeouts_total.inc();
            }
            changed = true;
        }
        changed |= run.raise_alert(
            AlertReason::Timeout {
                timeout_hours: job.job_timeout_hours,
            },
            now,
        );

        if changed {
            self.storage.update_run(run.clone()).await?;
        }
        Ok(changed)
    }

    /// Expire every job whose end date has passed
    pub async fn unschedule_and_expire(&self) -> Result<SweepReport> {
        let jobs = self.storage.list_jobs().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let lapsed = jobs
            .into_iter()
            .filter(|j| !j.is_expired() && j.is_lapsed(now));

        for job in lapsed {
            let result = match self.storage.get_job(&job.id).await {
                Ok(Some(current)) => self.expire(&current).await,
                Ok(None) => Ok(false),
                Err(e) => Err(e.into()),
            };
            report.record(result, |expired| *expired, "Job expiry", &job.id);
        }

        Ok(report)
    }

    /// Start a run for every due job, oldest start date first
    pub async fn launch_due_jobs(&self) -> Result<SweepReport> {
        let jobs = self.storage.list_jobs().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for job in jobs {
            let result = self.launch_if_due(&job.id, now).await;
            report.record(result, |started| *started, "Job launch", &job.id);
        }

        Ok(report)
    }

    async fn launch_if_due(&self, job_id: &SparkJobId, now: DateTime<Utc>) -> Result<bool> {
        let Some(job) = self.storage.get_job(job_id).await? else {
            return Ok(false);
        };
        let latest = self.storage.latest_run(&job.id).await?;
        if !job.is_due(now, latest.as_ref()) {
            return Ok(false);
        }
        let outcome = self.run(&job).await?;
        Ok(outcome.started().is_some())
    }

    /// One notification per run alert, stamped once handed to the notifier
    pub async fn send_run_alert_mails(&self) -> Result<SweepReport> {
        let runs = self.storage.list_runs_with_unsent_alerts().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for mut run in runs {
            let result = self.send_run_alert(&mut run, now).await;
            report.record(result, |_| true, "Run alert notification", &run.id);
        }

        Ok(report)
    }

    async fn send_run_alert(&self, run: &mut SparkJobRun, now: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.storage.get_job(&run.spark_job_id).await? {
            self.mailer
                .deliver(self.mailer.run_alert_message(&job, run))
                .await;
        }
        if let (Some(metrics), Some(alert)) = (self.metrics(), run.alert.as_ref()) {
            metrics.record_run_alert(alert.reason.code());
        }
        run.mark_alert_sent(now);
        self.storage.update_run(run.clone()).await?;
        Ok(())
    }

    /// One notification per expired job
    pub async fn send_expired_mails(&self) -> Result<SweepReport> {
        let jobs = self.storage.list_jobs().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let pending = jobs
            .into_iter()
            .filter(|j| j.expired_at.is_some() && j.expiry_mail_sent_at.is_none());

        for job in pending {
            self.mailer.deliver(self.mailer.job_expired_message(&job)).await;
            let result = self
                .storage
                .change_job(&job.id, &JobChange::ExpiryMailed, now)
                .await
                .map_err(ControlError::from);
            report.record(result, |updated| updated.changed, "Job expiry notification", &job.id);
        }

        Ok(report)
    }

    /// Deactivate user clusters past their end date and warn owners once
    /// when less than an hour is left
    pub async fn expire_clusters(&self) -> Result<SweepReport> {
        let clusters = self.storage.list_active_clusters().await?;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for cluster in clusters {
            let result = self.expire_cluster(&cluster.id, now).await;
            report.record(result, |acted| *acted, "Cluster expiry", &cluster.id);
        }

        Ok(report)
    }

    async fn expire_cluster(&self, id: &ClusterId, now: DateTime<Utc>) -> Result<bool> {
        let Some(cluster) = self.storage.get_cluster(id).await? else {
            return Ok(false);
        };

        if cluster.is_expired(now) {
            info!(cluster_id = %cluster.id, "Cluster reached its end date");
            let stopped = self.deactivate(&cluster).await?.is_some();
            if let Some(metrics) = self.metrics().filter(|_| stopped) {
                metrics.clusters_expired_total.inc();
            }
            return Ok(stopped);
        }
        if !cluster.needs_expiry_warning(now) {
            return Ok(false);
        }

        self.mailer
            .deliver(self.mailer.cluster_expiring_message(&cluster))
            .await;
        let warned = ClusterChange::ExpiryWarned {
            end_date: cluster.end_date,
        };
        self.storage.change_cluster(id, &warned, now).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_of_day_truncates_to_midnight() {
        let at = Utc.with_ymd_and_hms(2016, 4, 5, 13, 25, 47).unwrap();
        assert_eq!(start_of_day(at), Utc.with_ymd_and_hms(2016, 4, 5, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_sweep_report_counts_failures() {
        let mut report = SweepReport::default();
        report.record(Ok(true), |v| *v, "x", &"a");
        report.record(Ok(false), |v| *v, "x", &"b");
        report.record::<bool>(
            Err(crate::ControlError::NotFound("c".to_string())),
            |v| *v,
            "x",
            &"c",
        );
        assert_eq!(
            report,
            SweepReport {
                examined: 3,
                acted: 1,
                failed: 1
            }
        );
    }
}
