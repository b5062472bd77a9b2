//! The orchestrator
//!
//! Holds the injected collaborators and the ownership checks shared by the
//! cluster, job and reconciliation operations. The operations themselves
//! live in `clusters`, `jobs` and `reconcile`.

use crate::clock::Clock;
use crate::error::{ControlError, Result};
use crate::metrics::AtmoMetrics;
use crate::notify::Mailer;
use atmo_provisioning::{ClusterProvisioner, ProvisioningError};
use atmo_store::Storage;
use atmo_types::{
    Cluster, ClusterId, ClusterInfo, ClusterStatus, JobflowId, RunId, SparkJob, SparkJobId, SparkJobRun,
    UserRef,
};
use std::sync::Arc;
use tracing::warn;

/// Result of asking a job to run
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A new run was provisioned
    Started(SparkJobRun),

    /// The job already has an active run; nothing happened
    AlreadyRunning,
}

impl RunOutcome {
    pub fn started(&self) -> Option<&SparkJobRun> {
        match self {
            RunOutcome::Started(run) => Some(run),
            RunOutcome::AlreadyRunning => None,
        }
    }
}

/// Remote state right after a termination request
#[derive(Debug)]
pub(crate) enum AfterStop {
    Described(ClusterInfo),
    /// The provider no longer knows the handle
    Gone,
    /// Stop accepted but the follow-up describe failed
    Unrefreshed,
}

/// Cluster and scheduled job lifecycle orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) provisioner: Arc<dyn ClusterProvisioner>,
    pub(crate) mailer: Mailer,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Option<Arc<AtmoMetrics>>,
}

impl Orchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        provisioner: Arc<dyn ClusterProvisioner>,
        mailer: Mailer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            provisioner,
            mailer,
            clock,
            metrics: None,
        }
    }

    /// Count launches, timeouts, alerts and expiries
    pub fn with_metrics(mut self, metrics: Arc<AtmoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn provisioner(&self) -> &Arc<dyn ClusterProvisioner> {
        &self.provisioner
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn metrics(&self) -> Option<&AtmoMetrics> {
        self.metrics.as_deref()
    }

    // ========== Ownership ==========

    pub(crate) async fn owned_cluster(&self, id: &ClusterId, user: &UserRef) -> Result<Cluster> {
        let cluster = self
            .storage
            .get_cluster(id)
            .await?
            .ok_or_else(|| ControlError::cluster_not_found(id))?;

        if &cluster.created_by != user {
            return Err(ControlError::not_owner(user, id));
        }
        Ok(cluster)
    }

    pub(crate) async fn owned_job(&self, id: &SparkJobId, user: &UserRef) -> Result<SparkJob> {
        let job = self
            .storage
            .get_job(id)
            .await?
            .ok_or_else(|| ControlError::job_not_found(id))?;

        if &job.created_by != user {
            return Err(ControlError::not_owner(user, id));
        }
        Ok(job)
    }

    // ========== Remote helpers ==========

    /// Describe a cluster, treating a vanished handle as `None`
    pub(crate) async fn describe(&self, jobflow_id: &JobflowId) -> Result<Option<ClusterInfo>> {
        match self.provisioner.info(jobflow_id).await {
            Ok(info) => Ok(Some(info)),
            Err(ProvisioningError::NotFound(_)) => {
                warn!(jobflow_id = %jobflow_id, "Remote cluster not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Request termination of a run's cluster and fold the resulting state
    /// into the run. The caller persists.
    pub(crate) async fn terminate_run(&self, run: &mut SparkJobRun) -> Result<()> {
        if !run.is_active() {
            return Ok(());
        }

        let now = self.clock.now();
        let Some(jobflow_id) = run.jobflow_id.clone() else {
            // Reservation that never got a cluster
            run.status = ClusterStatus::Failed;
            run.finished_at = Some(now);
            return Ok(());
        };

        match self.stop_remote(&jobflow_id).await? {
            AfterStop::Described(info) => {
                run.apply_info(&info, now);
            }
            AfterStop::Gone => {
                // Nothing left to wait for
                run.status = ClusterStatus::Failed;
                run.finished_at = Some(now);
            }
            AfterStop::Unrefreshed => {}
        }
        Ok(())
    }

    /// Request termination, then describe the remote cluster once
    pub(crate) async fn stop_remote(&self, jobflow_id: &JobflowId) -> Result<AfterStop> {
        match self.provisioner.stop(jobflow_id).await {
            Ok(()) => {}
            Err(ProvisioningError::NotFound(_)) => {
                warn!(jobflow_id = %jobflow_id, "Remote cluster already gone");
                return Ok(AfterStop::Gone);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(match self.describe(jobflow_id).await {
            Ok(Some(info)) => AfterStop::Described(info),
            Ok(None) => AfterStop::Gone,
            Err(e) => {
                warn!(jobflow_id = %jobflow_id, error = %e, "Status refresh after stop failed");
                AfterStop::Unrefreshed
            }
        })
    }

    /// Drop a reserved run after provisioning failed
    pub(crate) async fn release_run(&self, run_id: &RunId) {
        if let Err(e) = self.storage.delete_run(run_id).await {
            warn!(run_id = %run_id, error = %e, "Failed to release run reservation");
        }
    }

    /// Terminate a cluster whose local record could not be written
    pub(crate) async fn abandon_cluster(&self, jobflow_id: &JobflowId) {
        if let Err(e) = self.provisioner.stop(jobflow_id).await {
            warn!(jobflow_id = %jobflow_id, error = %e, "Failed to stop orphaned cluster");
        }
    }
}
