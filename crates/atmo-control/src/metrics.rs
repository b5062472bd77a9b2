//! Usage metrics
//!
//! Prometheus counters for what the orchestrator launches, stops and
//! reports. The daemon owns the registry and exposes it for scraping.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Orchestrator counters
#[derive(Debug, Clone)]
pub struct AtmoMetrics {
    /// Job runs launched, by EMR release
    pub runs_started_total: IntCounterVec,

    /// User clusters launched, by EMR release
    pub clusters_started_total: IntCounterVec,

    /// Runs stopped for exceeding their job timeout
    pub run_timeouts_total: IntCounter,

    /// Run alert notifications sent, by alert code
    pub run_alerts_total: IntCounterVec,

    pub jobs_expired_total: IntCounter,

    /// User clusters stopped at their end date
    pub clusters_expired_total: IntCounter,

    /// Entities a sweep step skipped because of an error
    pub sweep_failures_total: IntCounterVec,
}

impl AtmoMetrics {
    /// Create the counters and register them
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let runs_started_total = IntCounterVec::new(
            Opts::new("atmo_job_runs_started_total", "Scheduled job runs launched"),
            &["emr_release"],
        )?;
        registry.register(Box::new(runs_started_total.clone()))?;

        let clusters_started_total = IntCounterVec::new(
            Opts::new("atmo_clusters_started_total", "User clusters launched"),
            &["emr_release"],
        )?;
        registry.register(Box::new(clusters_started_total.clone()))?;

        let run_timeouts_total = IntCounter::new(
            "atmo_job_run_timeouts_total",
            "Job runs terminated after exceeding their timeout",
        )?;
        registry.register(Box::new(run_timeouts_total.clone()))?;

        let run_alerts_total = IntCounterVec::new(
            Opts::new("atmo_job_run_alerts_total", "Run alert notifications sent"),
            &["reason"],
        )?;
        registry.register(Box::new(run_alerts_total.clone()))?;

        let jobs_expired_total =
            IntCounter::new("atmo_jobs_expired_total", "Scheduled jobs expired")?;
        registry.register(Box::new(jobs_expired_total.clone()))?;

        let clusters_expired_total = IntCounter::new(
            "atmo_clusters_expired_total",
            "User clusters terminated at their end date",
        )?;
        registry.register(Box::new(clusters_expired_total.clone()))?;

        let sweep_failures_total = IntCounterVec::new(
            Opts::new("atmo_sweep_failures_total", "Entities skipped by a sweep step"),
            &["step"],
        )?;
        registry.register(Box::new(sweep_failures_total.clone()))?;

        Ok(Self {
            runs_started_total,
            clusters_started_total,
            run_timeouts_total,
            run_alerts_total,
            jobs_expired_total,
            clusters_expired_total,
            sweep_failures_total,
        })
    }

    pub fn record_run_started(&self, emr_release: &str) {
        self.runs_started_total.with_label_values(&[emr_release]).inc();
    }

    pub fn record_cluster_started(&self, emr_release: &str) {
        self.clusters_started_total
            .with_label_values(&[emr_release])
            .inc();
    }

    pub fn record_run_alert(&self, reason: &str) {
        self.run_alerts_total.with_label_values(&[reason]).inc();
    }

    pub fn record_sweep_failures(&self, step: &str, failed: usize) {
        if failed > 0 {
            self.sweep_failures_total
                .with_label_values(&[step])
                .inc_by(failed as u64);
        }
    }
}
