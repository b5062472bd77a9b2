//! End-to-end lifecycle scenarios against the in-memory provider and store

use async_trait::async_trait;
use atmo_control::{
    AtmoMetrics, ControlError, ManualClock, Mailer, NotificationSettings, Orchestrator,
    RecordingNotifier, RunOutcome, SweepReport,
};
use atmo_provisioning::{
    ClusterProvisioner, ClusterSpec, InMemoryProvisioner, ProvisioningError,
    Result as ProvisioningResult,
};
use atmo_store::{InMemoryStorage, RunStorage};
use atmo_types::{
    ClusterInfo, ClusterRequest, ClusterStatus, ClusterUpdate, JobflowId, ResultVisibility,
    Schedule, SparkJob, SparkJobForm, UserRef,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use prometheus::Registry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

struct Harness {
    orchestrator: Orchestrator,
    storage: InMemoryStorage,
    provisioner: Arc<InMemoryProvisioner>,
    remote: Arc<ScriptedProvisioner>,
    notifier: RecordingNotifier,
    clock: Arc<ManualClock>,
}

/// Holds one call until the test releases it
#[derive(Default)]
struct Gate {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl Gate {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    fn open(&self) {
        self.release.notify_one();
    }
}

/// In-memory provider with injectable failures and pauses
struct ScriptedProvisioner {
    inner: Arc<InMemoryProvisioner>,
    list_gate: Gate,
    start_gate: Gate,
    fail_next_list: AtomicBool,
    failing_stops: Mutex<HashSet<JobflowId>>,
    started: Mutex<Vec<String>>,
}

impl ScriptedProvisioner {
    fn new(inner: Arc<InMemoryProvisioner>) -> Self {
        Self {
            inner,
            list_gate: Gate::default(),
            start_gate: Gate::default(),
            fail_next_list: AtomicBool::new(false),
            failing_stops: Mutex::new(HashSet::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    fn fail_stop(&self, jobflow_id: &JobflowId) {
        self.failing_stops.lock().unwrap().insert(jobflow_id.clone());
    }

    fn started_identifiers(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterProvisioner for ScriptedProvisioner {
    async fn start(&self, spec: &ClusterSpec) -> ProvisioningResult<JobflowId> {
        self.start_gate.pass().await;
        let jobflow_id = self.inner.start(spec).await?;
        self.started.lock().unwrap().push(spec.identifier.clone());
        Ok(jobflow_id)
    }

    async fn info(&self, jobflow_id: &JobflowId) -> ProvisioningResult<ClusterInfo> {
        self.inner.info(jobflow_id).await
    }

    async fn list(&self, created_after: DateTime<Utc>) -> ProvisioningResult<Vec<ClusterInfo>> {
        self.list_gate.pass().await;
        if self.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(ProvisioningError::Transport("connection reset".to_string()));
        }
        self.inner.list(created_after).await
    }

    async fn rename(&self, jobflow_id: &JobflowId, new_identifier: &str) -> ProvisioningResult<()> {
        self.inner.rename(jobflow_id, new_identifier).await
    }

    async fn stop(&self, jobflow_id: &JobflowId) -> ProvisioningResult<()> {
        if self.failing_stops.lock().unwrap().contains(jobflow_id) {
            return Err(ProvisioningError::Rejected {
                code: "InternalFailure".to_string(),
                message: "Service unavailable".to_string(),
            });
        }
        self.inner.stop(jobflow_id).await
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 4, 5, 13, 25, 47).unwrap()
}

fn harness() -> Harness {
    let storage = InMemoryStorage::new();
    let provisioner = Arc::new(InMemoryProvisioner::new());
    let remote = Arc::new(ScriptedProvisioner::new(provisioner.clone()));
    let notifier = RecordingNotifier::new();
    let clock = Arc::new(ManualClock::new(t0()));

    let orchestrator = Orchestrator::new(
        Arc::new(storage.clone()),
        remote.clone(),
        Mailer::new(Arc::new(notifier.clone()), NotificationSettings::default()),
        clock.clone(),
    );

    Harness {
        orchestrator,
        storage,
        provisioner,
        remote,
        notifier,
        clock,
    }
}

fn owner() -> UserRef {
    UserRef::new("john@example.com")
}

fn cluster_request(lifetime_hours: u32) -> ClusterRequest {
    ClusterRequest {
        identifier: "john-analysis".to_string(),
        size: 3,
        public_key: "ssh-rsa AAAAB3NzaC1yc2E john@laptop".to_string(),
        emr_release: "5.2.1".to_string(),
        lifetime_hours: Some(lifetime_hours),
    }
}

fn job_form(interval_in_hours: u32, job_timeout: u32) -> SparkJobForm {
    SparkJobForm {
        identifier: "test-spark-job".to_string(),
        size: 2,
        interval_in_hours,
        job_timeout,
        start_date: t0() - Duration::hours(1),
        end_date: None,
        is_enabled: true,
        notebook_key: "jobs/test-spark-job/notebook.ipynb".to_string(),
        result_visibility: ResultVisibility::Private,
        emr_release: "5.2.1".to_string(),
    }
}

async fn create_job(h: &Harness, form: SparkJobForm) -> SparkJob {
    h.orchestrator.create_job(form, &owner()).await.unwrap()
}

#[tokio::test]
async fn test_second_run_request_is_a_no_op() {
    let h = harness();
    let job = create_job(&h, job_form(24, 12)).await;

    let first = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    let second = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();

    assert!(first.started().is_some());
    assert_eq!(second, RunOutcome::AlreadyRunning);
    assert_eq!(h.orchestrator.list_runs(&job.id, &owner()).await.unwrap().len(), 1);
    assert_eq!(h.provisioner.start_calls(), 1);
}

#[tokio::test]
async fn test_weekly_job_is_due_after_one_full_interval() {
    let h = harness();
    let job = create_job(&h, job_form(168, 12)).await;

    let run = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    let handle = run.started().unwrap().jobflow_id.clone().unwrap();
    h.provisioner.set_state(&handle, ClusterStatus::Terminated).await;
    h.orchestrator.status_pass().await;

    let job = h.storage_job(&job).await;

    h.clock.set(t0() + Duration::hours(167));
    assert!(matches!(
        h.orchestrator.job_schedule(&job).await.unwrap(),
        Schedule::NotYetDue { .. }
    ));

    h.clock.set(t0() + Duration::hours(169));
    assert_eq!(h.orchestrator.job_schedule(&job).await.unwrap(), Schedule::Due);
}

#[tokio::test]
async fn test_sweep_launches_a_due_job_exactly_once() {
    let h = harness();
    let job = create_job(&h, job_form(24, 12)).await;

    let report = h.orchestrator.maintenance_pass().await;
    assert_eq!(report.launched.acted, 1);

    let runs = h.orchestrator.list_runs(&job.id, &owner()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].jobflow_id.is_some());

    let report = h.orchestrator.maintenance_pass().await;
    assert_eq!(report.launched.acted, 0);
    assert_eq!(h.provisioner.start_calls(), 1);
}

#[tokio::test]
async fn test_timed_out_run_is_stopped_and_alerted_once() {
    let h = harness();
    let job = create_job(&h, job_form(24, 2)).await;
    h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();

    h.clock.advance(Duration::hours(3));
    let report = h.orchestrator.maintenance_pass().await;
    assert_eq!(report.timed_out.acted, 1);
    assert_eq!(report.run_alert_mails.acted, 1);

    h.clock.advance(Duration::hours(1));
    h.orchestrator.maintenance_pass().await;

    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[ATMO] Running Spark job test-spark-job failed");
    assert_eq!(h.provisioner.stop_calls(), 1);

    let run = h.storage.latest_run(&job.id).await.unwrap().unwrap();
    assert_eq!(run.status, ClusterStatus::Terminated);
    assert!(run.alert.unwrap().mail_sent_at.is_some());
}

#[tokio::test]
async fn test_failed_run_raises_cluster_failure_alert() {
    let h = harness();
    let job = create_job(&h, job_form(24, 12)).await;
    let outcome = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    let handle = outcome.started().unwrap().jobflow_id.clone().unwrap();

    let mut info = ClusterInfo::new(handle.clone(), ClusterStatus::TerminatedWithErrors, t0());
    info.state_change_reason_code = Some("BOOTSTRAP_FAILURE".to_string());
    info.state_change_reason_message = Some("Bootstrapping steps failed.".to_string());
    h.provisioner.set_info(info).await;

    let status = h.orchestrator.status_pass().await;
    assert_eq!(status.runs_updated.len(), 1);
    assert_eq!(status.runs_updated[0].0, "test-spark-job");

    h.orchestrator.maintenance_pass().await;
    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("Bootstrapping steps failed."));
}

#[tokio::test]
async fn test_lapsed_job_expires_and_mails_once() {
    let h = harness();
    let mut form = job_form(24, 12);
    form.end_date = Some(t0() + Duration::days(1));
    let job = create_job(&h, form).await;

    h.clock.advance(Duration::days(2));
    let report = h.orchestrator.maintenance_pass().await;
    assert_eq!(report.expired_jobs.acted, 1);
    assert_eq!(report.launched.acted, 0);

    h.orchestrator.maintenance_pass().await;
    let sent = h.notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "[ATMO] Spark job test-spark-job expired");

    let job = h.storage_job(&job).await;
    assert!(job.is_expired());
    assert!(job.expiry_mail_sent_at.is_some());
}

#[tokio::test]
async fn test_expiry_warning_sent_once_and_rearmed_by_extend() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(2), &owner())
        .await
        .unwrap();

    h.clock.set(t0() + Duration::minutes(90));
    h.orchestrator.maintenance_pass().await;
    h.orchestrator.maintenance_pass().await;
    assert_eq!(h.notifier.count().await, 1);

    let extended = h
        .orchestrator
        .extend_cluster(&cluster.id, &owner(), 2)
        .await
        .unwrap();
    assert_eq!(extended.end_date, Some(t0() + Duration::hours(4)));
    assert!(!extended.expiration_mail_sent);

    h.clock.set(t0() + Duration::minutes(210));
    h.orchestrator.maintenance_pass().await;
    assert_eq!(h.notifier.count().await, 2);

    h.clock.set(t0() + Duration::hours(4));
    let report = h.orchestrator.maintenance_pass().await;
    assert_eq!(report.expired_clusters.acted, 1);

    let cluster = h.orchestrator.get_cluster(&cluster.id, &owner()).await.unwrap();
    assert_eq!(cluster.most_recent_status, ClusterStatus::Terminated);
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();

    let first = h.orchestrator.terminate_cluster(&cluster.id, &owner()).await.unwrap();
    let second = h.orchestrator.terminate_cluster(&cluster.id, &owner()).await.unwrap();

    assert_eq!(first.most_recent_status, ClusterStatus::Terminated);
    assert_eq!(second.most_recent_status, ClusterStatus::Terminated);
    assert_eq!(h.provisioner.stop_calls(), 1);
}

#[tokio::test]
async fn test_rejected_provisioning_leaves_no_record() {
    let h = harness();
    h.provisioner.reject_next_start("Insufficient capacity").await;

    let err = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Provisioning(ProvisioningError::Rejected { .. })));
    assert!(h.orchestrator.list_clusters(&owner()).await.unwrap().is_empty());

    let job = create_job(&h, job_form(24, 12)).await;
    h.provisioner.reject_next_start("Insufficient capacity").await;
    assert!(h.orchestrator.run_job_now(&job.id, &owner()).await.is_err());
    assert!(h.orchestrator.list_runs(&job.id, &owner()).await.unwrap().is_empty());

    // The reservation is gone, so the next attempt goes through
    let retry = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    assert!(retry.started().is_some());
}

#[tokio::test]
async fn test_invalid_request_never_reaches_the_provider() {
    let h = harness();
    let mut request = cluster_request(8);
    request.public_key = "not a key".to_string();

    let err = h.orchestrator.create_cluster(request, &owner()).await.unwrap_err();
    assert!(matches!(err, ControlError::Validation(_)));
    assert_eq!(h.provisioner.start_calls(), 0);
}

#[tokio::test]
async fn test_other_users_cannot_touch_entities() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();
    let job = create_job(&h, job_form(24, 12)).await;
    let intruder = UserRef::new("mallory@example.com");

    assert!(matches!(
        h.orchestrator.terminate_cluster(&cluster.id, &intruder).await,
        Err(ControlError::PermissionDenied(_))
    ));
    assert!(matches!(
        h.orchestrator.run_job_now(&job.id, &intruder).await,
        Err(ControlError::PermissionDenied(_))
    ));
    assert!(h.orchestrator.list_clusters(&intruder).await.unwrap().is_empty());
    assert_eq!(h.provisioner.stop_calls(), 0);
}

#[tokio::test]
async fn test_vanished_cluster_is_marked_unknown() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();
    h.provisioner.forget(cluster.jobflow_id.as_ref().unwrap()).await;

    let err = h
        .orchestrator
        .refresh_cluster(&cluster.id, &owner())
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::Provisioning(ProvisioningError::NotFound(_))));

    let cluster = h.orchestrator.get_cluster(&cluster.id, &owner()).await.unwrap();
    assert_eq!(cluster.most_recent_status, ClusterStatus::Unknown);
}

#[tokio::test]
async fn test_rename_updates_remote_tag() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();

    let renamed = h
        .orchestrator
        .rename_cluster(
            &cluster.id,
            &owner(),
            ClusterUpdate {
                identifier: Some("john-renamed".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(renamed.identifier, "john-renamed");
    let spec = h
        .provisioner
        .spec(cluster.jobflow_id.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(spec.identifier, "john-renamed");
}

#[tokio::test]
async fn test_delete_job_stops_active_run() {
    let h = harness();
    let job = create_job(&h, job_form(24, 12)).await;
    let outcome = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    let handle = outcome.started().unwrap().jobflow_id.clone().unwrap();

    h.orchestrator.delete_job(&job.id, &owner()).await.unwrap();

    assert_eq!(h.provisioner.state(&handle).await, Some(ClusterStatus::Terminated));
    assert!(matches!(
        h.orchestrator.get_job(&job.id, &owner()).await,
        Err(ControlError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_status_sync_keeps_concurrent_extension() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();
    let handle = cluster.jobflow_id.clone().unwrap();
    h.provisioner.set_state(&handle, ClusterStatus::Bootstrapping).await;

    h.remote.list_gate.arm();
    let (status, extended) = tokio::join!(h.orchestrator.status_pass(), async {
        h.remote.list_gate.wait_entered().await;
        let extended = h.orchestrator.extend_cluster(&cluster.id, &owner(), 10).await;
        h.remote.list_gate.open();
        extended
    });

    assert_eq!(extended.unwrap().end_date, Some(t0() + Duration::hours(18)));
    assert_eq!(status.clusters.acted, 1);

    let cluster = h.orchestrator.get_cluster(&cluster.id, &owner()).await.unwrap();
    assert_eq!(cluster.most_recent_status, ClusterStatus::Bootstrapping);
    assert_eq!(cluster.end_date, Some(t0() + Duration::hours(18)));
}

#[tokio::test]
async fn test_launch_keeps_concurrent_job_edit() {
    let h = harness();
    let job = create_job(&h, job_form(24, 12)).await;

    h.remote.start_gate.arm();
    let (launched, edited) = tokio::join!(h.orchestrator.launch_due_jobs(), async {
        h.remote.start_gate.wait_entered().await;
        let mut form = job_form(24, 12);
        form.is_enabled = false;
        let edited = h.orchestrator.edit_job(&job.id, &owner(), form).await;
        h.remote.start_gate.open();
        edited
    });

    assert!(!edited.unwrap().is_enabled);
    assert_eq!(launched.unwrap().acted, 1);

    let job = h.storage_job(&job).await;
    assert!(!job.is_enabled);
    assert!(job.last_run_id.is_some());
}

#[tokio::test]
async fn test_vanished_expired_cluster_is_closed() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(1), &owner())
        .await
        .unwrap();
    h.provisioner.forget(cluster.jobflow_id.as_ref().unwrap()).await;

    h.clock.advance(Duration::hours(2));
    let first = h.orchestrator.maintenance_pass().await;
    assert_eq!(first.expired_clusters.acted, 1);

    for _ in 0..2 {
        let again = h.orchestrator.maintenance_pass().await;
        assert_eq!(again.expired_clusters, SweepReport::default());
    }

    assert_eq!(h.provisioner.stop_calls(), 1);
    let cluster = h.orchestrator.get_cluster(&cluster.id, &owner()).await.unwrap();
    assert_eq!(cluster.most_recent_status, ClusterStatus::Terminated);
}

#[tokio::test]
async fn test_cluster_expiry_continues_past_a_failed_stop() {
    let h = harness();
    let mut stuck_request = cluster_request(1);
    stuck_request.identifier = "john-stuck".to_string();
    let stuck = h
        .orchestrator
        .create_cluster(stuck_request, &owner())
        .await
        .unwrap();
    let other = h
        .orchestrator
        .create_cluster(cluster_request(1), &owner())
        .await
        .unwrap();
    h.remote.fail_stop(stuck.jobflow_id.as_ref().unwrap());

    h.clock.advance(Duration::hours(2));
    let report = h.orchestrator.expire_clusters().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            examined: 2,
            acted: 1,
            failed: 1,
        }
    );

    let other = h.orchestrator.get_cluster(&other.id, &owner()).await.unwrap();
    assert_eq!(other.most_recent_status, ClusterStatus::Terminated);
    let stuck = h.orchestrator.get_cluster(&stuck.id, &owner()).await.unwrap();
    assert!(stuck.is_active());
}

#[tokio::test]
async fn test_due_jobs_launch_oldest_start_date_first() {
    let h = harness();
    let mut recent = job_form(24, 12);
    recent.identifier = "recent-job".to_string();
    create_job(&h, recent).await;

    let mut older = job_form(24, 12);
    older.identifier = "older-job".to_string();
    older.start_date = t0() - Duration::hours(3);
    create_job(&h, older).await;

    let report = h.orchestrator.launch_due_jobs().await.unwrap();
    assert_eq!(report.acted, 2);
    assert_eq!(
        h.remote.started_identifiers(),
        vec!["older-job".to_string(), "recent-job".to_string()]
    );
}

#[tokio::test]
async fn test_vanished_run_goes_unknown_then_times_out() {
    let h = harness();
    let job = create_job(&h, job_form(24, 2)).await;
    let outcome = h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    let handle = outcome.started().unwrap().jobflow_id.clone().unwrap();
    h.provisioner.forget(&handle).await;

    let status = h.orchestrator.status_pass().await;
    assert_eq!(status.runs_updated.len(), 1);
    let run = h.storage.latest_run(&job.id).await.unwrap().unwrap();
    assert_eq!(run.status, ClusterStatus::Unknown);

    h.clock.advance(Duration::hours(3));
    let report = h.orchestrator.maintenance_pass().await;
    assert!(report.status.runs_updated.is_empty());
    assert_eq!(report.timed_out.acted, 1);

    let run = h.storage.latest_run(&job.id).await.unwrap().unwrap();
    assert_eq!(run.status, ClusterStatus::Failed);
    assert!(run.finished_at.is_some());
    assert!(run.alert.is_some());
}

#[tokio::test]
async fn test_failed_listing_falls_back_to_describe() {
    let h = harness();
    let cluster = h
        .orchestrator
        .create_cluster(cluster_request(8), &owner())
        .await
        .unwrap();
    h.provisioner
        .set_state(cluster.jobflow_id.as_ref().unwrap(), ClusterStatus::Waiting)
        .await;

    h.remote.fail_next_list.store(true, Ordering::SeqCst);
    let status = h.orchestrator.status_pass().await;
    assert_eq!(status.clusters.acted, 1);
    assert_eq!(status.clusters.failed, 0);

    let cluster = h.orchestrator.get_cluster(&cluster.id, &owner()).await.unwrap();
    assert_eq!(cluster.most_recent_status, ClusterStatus::Waiting);
}

#[tokio::test]
async fn test_usage_counters_follow_launches() {
    let mut h = harness();
    let registry = Registry::new();
    let metrics = Arc::new(AtmoMetrics::new(&registry).unwrap());
    h.orchestrator = h.orchestrator.clone().with_metrics(metrics.clone());

    let job = create_job(&h, job_form(24, 2)).await;
    h.orchestrator.run_job_now(&job.id, &owner()).await.unwrap();
    h.orchestrator
        .create_cluster(cluster_request(1), &owner())
        .await
        .unwrap();

    h.clock.advance(Duration::hours(3));
    h.orchestrator.maintenance_pass().await;

    assert_eq!(metrics.runs_started_total.with_label_values(&["5.2.1"]).get(), 1);
    assert_eq!(metrics.clusters_started_total.with_label_values(&["5.2.1"]).get(), 1);
    assert_eq!(metrics.run_timeouts_total.get(), 1);
    assert_eq!(metrics.run_alerts_total.with_label_values(&["TIMEOUT"]).get(), 1);
    assert_eq!(metrics.clusters_expired_total.get(), 1);
}

impl Harness {
    async fn storage_job(&self, job: &SparkJob) -> SparkJob {
        self.orchestrator.get_job(&job.id, &owner()).await.unwrap()
    }
}
