//! Sweep scheduler

use crate::config::SchedulerConfig;
use atmo_control::{MaintenanceReport, Orchestrator, StatusReport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Which pass to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    /// Remote status sync only
    Status,
    /// Every reconciliation step
    Maintenance,
}

/// Result of one pass
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "pass", rename_all = "lowercase")]
pub enum PassReport {
    Status(StatusReport),
    Maintenance(MaintenanceReport),
}

/// Scheduler state
pub struct Scheduler {
    config: SchedulerConfig,
    orchestrator: Orchestrator,
    trigger_tx: mpsc::Sender<PassKind>,
    running: Arc<RwLock<bool>>,
    /// Passes never overlap
    pass_lock: Mutex<()>,
    last_maintenance: RwLock<Option<(chrono::DateTime<chrono::Utc>, MaintenanceReport)>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        orchestrator: Orchestrator,
    ) -> (Arc<Self>, mpsc::Receiver<PassKind>) {
        let (trigger_tx, trigger_rx) = mpsc::channel(10);

        let scheduler = Arc::new(Self {
            config,
            orchestrator,
            trigger_tx,
            running: Arc::new(RwLock::new(false)),
            pass_lock: Mutex::new(()),
            last_maintenance: RwLock::new(None),
        });

        (scheduler, trigger_rx)
    }

    /// Queue a pass on the background loop. Returns false when the queue is
    /// full or the loop is gone.
    pub fn trigger(&self, kind: PassKind) -> bool {
        self.trigger_tx.try_send(kind).is_ok()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Completion time and report of the latest maintenance pass
    pub async fn last_maintenance(
        &self,
    ) -> Option<(chrono::DateTime<chrono::Utc>, MaintenanceReport)> {
        self.last_maintenance.read().await.clone()
    }

    /// Drive both sweep intervals and queued triggers until stopped
    pub async fn start(self: Arc<Self>, mut trigger_rx: mpsc::Receiver<PassKind>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let mut status_ticker = interval(Duration::from_secs(self.config.status_interval_secs.max(1)));
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut maintenance_ticker =
            interval(Duration::from_secs(self.config.maintenance_interval_secs.max(1)));
        maintenance_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            status_interval_secs = self.config.status_interval_secs,
            maintenance_interval_secs = self.config.maintenance_interval_secs,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = status_ticker.tick() => {
                    self.run_pass(PassKind::Status).await;
                }
                _ = maintenance_ticker.tick() => {
                    self.run_pass(PassKind::Maintenance).await;
                }
                Some(kind) = trigger_rx.recv() => {
                    tracing::info!(pass = ?kind, "Triggered pass");
                    self.run_pass(kind).await;
                }
                else => break,
            }

            if !self.is_running().await {
                break;
            }
        }

        tracing::info!("Scheduler stopped");
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Wait until no pass is in progress
    pub async fn wait_idle(&self) {
        let _guard = self.pass_lock.lock().await;
    }

    /// Run one pass now, waiting for any pass in progress to finish first
    pub async fn run_pass(&self, kind: PassKind) -> PassReport {
        let _guard = self.pass_lock.lock().await;

        match kind {
            PassKind::Status => {
                let report = self.orchestrator.status_pass().await;
                tracing::debug!(
                    runs_updated = report.runs_updated.len(),
                    clusters_updated = report.clusters.acted,
                    "Status pass complete"
                );
                PassReport::Status(report)
            }
            PassKind::Maintenance => {
                let report = self.orchestrator.maintenance_pass().await;
                let finished_at = self.orchestrator.clock().now();
                *self.last_maintenance.write().await = Some((finished_at, report.clone()));
                PassReport::Maintenance(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmo_control::{LogNotifier, Mailer, NotificationSettings, SystemClock};
    use atmo_provisioning::InMemoryProvisioner;
    use atmo_store::InMemoryStorage;

    fn scheduler() -> (Arc<Scheduler>, mpsc::Receiver<PassKind>) {
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(InMemoryProvisioner::new()),
            Mailer::new(Arc::new(LogNotifier), NotificationSettings::default()),
            Arc::new(SystemClock),
        );
        Scheduler::new(SchedulerConfig::default(), orchestrator)
    }

    #[tokio::test]
    async fn test_maintenance_pass_is_recorded() {
        let (scheduler, _rx) = scheduler();
        assert!(scheduler.last_maintenance().await.is_none());

        let report = scheduler.run_pass(PassKind::Maintenance).await;
        assert!(matches!(report, PassReport::Maintenance(_)));
        assert!(scheduler.last_maintenance().await.is_some());
    }

    #[tokio::test]
    async fn test_trigger_queues_pass() {
        let (scheduler, mut rx) = scheduler();
        assert!(scheduler.trigger(PassKind::Status));
        assert_eq!(rx.recv().await, Some(PassKind::Status));
    }

    #[tokio::test]
    async fn test_stop_ends_loop() {
        let (scheduler, rx) = scheduler();
        let handle = tokio::spawn(scheduler.clone().start(rx));

        while !scheduler.is_running().await {
            tokio::task::yield_now().await;
        }
        scheduler.stop().await;
        assert!(scheduler.trigger(PassKind::Status));

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
