//! Cluster operations
//!
//! Provisioning happens before the first write: a rejected start leaves no
//! local record behind, and a failed write stops the freshly started remote
//! cluster again. Later writes go through field-scoped changes so a user
//! edit and a status sweep never overwrite each other.

use crate::error::{ControlError, Result};
use crate::orchestrator::{AfterStop, Orchestrator};
use atmo_provisioning::{ClusterSpec, ProvisioningError};
use atmo_types::{Cluster, ClusterChange, ClusterId, ClusterRequest, ClusterUpdate, UserRef};
use tracing::{info, instrument, warn};

impl Orchestrator {
    /// Validate, provision and record a new cluster
    #[instrument(skip(self, request), fields(identifier = %request.identifier, user = %user))]
    pub async fn create_cluster(&self, request: ClusterRequest, user: &UserRef) -> Result<Cluster> {
        request.validate()?;

        let now = self.clock.now();
        let mut cluster = Cluster::from_request(&request, user.clone(), now);

        let spec = ClusterSpec {
            owner_email: user.email().to_string(),
            identifier: cluster.identifier.clone(),
            size: cluster.size,
            public_key: Some(cluster.public_key.clone()),
            emr_release: cluster.emr_release.clone(),
            job: None,
        };
        let jobflow_id = self.provisioner.start(&spec).await?;
        cluster.assign_jobflow_id(jobflow_id.clone())?;

        match self.describe(&jobflow_id).await {
            Ok(Some(remote)) => {
                cluster.apply_info(&remote);
            }
            Ok(None) => {
                cluster.mark_unknown();
            }
            Err(e) => warn!(jobflow_id = %jobflow_id, error = %e, "Initial status refresh failed"),
        }

        if let Err(e) = self.storage.upsert_cluster(cluster.clone()).await {
            self.abandon_cluster(&jobflow_id).await;
            return Err(e.into());
        }

        if let Some(metrics) = self.metrics() {
            metrics.record_cluster_started(&cluster.emr_release);
        }
        info!(cluster_id = %cluster.id, jobflow_id = %jobflow_id, "Cluster started");
        Ok(cluster)
    }

    pub async fn get_cluster(&self, id: &ClusterId, user: &UserRef) -> Result<Cluster> {
        self.owned_cluster(id, user).await
    }

    pub async fn list_clusters(&self, user: &UserRef) -> Result<Vec<Cluster>> {
        Ok(self.storage.list_clusters_for_user(user).await?)
    }

    /// Fetch the remote status of one cluster and persist it.
    ///
    /// A handle the provider no longer knows marks the cluster `UNKNOWN`
    /// and is reported as `NotFound`.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn refresh_cluster(&self, id: &ClusterId, user: &UserRef) -> Result<Cluster> {
        let cluster = self.owned_cluster(id, user).await?;
        let Some(jobflow_id) = cluster.jobflow_id.clone() else {
            return Ok(cluster);
        };

        match self.provisioner.info(&jobflow_id).await {
            Ok(remote) => self.change_cluster(id, ClusterChange::Remote(remote)).await,
            Err(ProvisioningError::NotFound(handle)) => {
                self.change_cluster(id, ClusterChange::Unknown).await?;
                Err(ProvisioningError::NotFound(handle).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rename remotely first, then locally, so the two never diverge
    #[instrument(skip(self, update), fields(user = %user))]
    pub async fn rename_cluster(
        &self,
        id: &ClusterId,
        user: &UserRef,
        update: ClusterUpdate,
    ) -> Result<Cluster> {
        update.validate()?;
        let cluster = self.owned_cluster(id, user).await?;

        let Some(identifier) = update.identifier else {
            return Ok(cluster);
        };
        if identifier == cluster.identifier {
            return Ok(cluster);
        }

        if let Some(jobflow_id) = cluster.jobflow_id.as_ref().filter(|_| cluster.is_active()) {
            self.provisioner.rename(jobflow_id, &identifier).await?;
        }

        let cluster = self.change_cluster(id, ClusterChange::Rename(identifier)).await?;
        info!(cluster_id = %cluster.id, identifier = %cluster.identifier, "Cluster renamed");
        Ok(cluster)
    }

    /// Push the end date out by `hours` and re-arm the expiry warning
    #[instrument(skip(self), fields(user = %user))]
    pub async fn extend_cluster(&self, id: &ClusterId, user: &UserRef, hours: u32) -> Result<Cluster> {
        let mut preview = self.owned_cluster(id, user).await?;
        preview.extend(hours, self.clock.now())?;

        let cluster = self.change_cluster(id, ClusterChange::Extend { hours }).await?;
        info!(cluster_id = %cluster.id, end_date = ?cluster.end_date, "Cluster lifetime extended");
        Ok(cluster)
    }

    /// Stop the remote cluster and record its resulting state
    #[instrument(skip(self), fields(user = %user))]
    pub async fn terminate_cluster(&self, id: &ClusterId, user: &UserRef) -> Result<Cluster> {
        let cluster = self.owned_cluster(id, user).await?;
        Ok(match self.deactivate(&cluster).await? {
            Some(updated) => updated,
            None => cluster,
        })
    }

    /// Terminate the remote cluster, then drop the local record
    #[instrument(skip(self), fields(user = %user))]
    pub async fn delete_cluster(&self, id: &ClusterId, user: &UserRef) -> Result<()> {
        let cluster = self.owned_cluster(id, user).await?;
        self.deactivate(&cluster).await?;

        if !self.storage.delete_cluster(id).await? {
            return Err(ControlError::cluster_not_found(id));
        }
        info!(cluster_id = %id, "Cluster deleted");
        Ok(())
    }

    /// Stop and record the resulting state.
    ///
    /// Returns `None` for a cluster that is already final or was never
    /// provisioned. A cluster the provider no longer knows is closed as
    /// `TERMINATED`, since nothing remote is left to stop.
    pub(crate) async fn deactivate(&self, cluster: &Cluster) -> Result<Option<Cluster>> {
        if !cluster.is_active() {
            return Ok(None);
        }
        let Some(jobflow_id) = cluster.jobflow_id.clone() else {
            return Ok(None);
        };

        let updated = match self.stop_remote(&jobflow_id).await? {
            AfterStop::Described(remote) => {
                self.change_cluster(&cluster.id, ClusterChange::Remote(remote)).await?
            }
            AfterStop::Gone => self.change_cluster(&cluster.id, ClusterChange::Stopped).await?,
            AfterStop::Unrefreshed => cluster.clone(),
        };

        info!(
            cluster_id = %updated.id,
            jobflow_id = %jobflow_id,
            status = %updated.most_recent_status,
            "Cluster deactivated"
        );
        Ok(Some(updated))
    }

    /// Apply a change to the saved cluster and return the result
    pub(crate) async fn change_cluster(&self, id: &ClusterId, change: ClusterChange) -> Result<Cluster> {
        let updated = self
            .storage
            .change_cluster(id, &change, self.clock.now())
            .await?;
        Ok(updated.record)
    }
}
