//! Application state for API handlers

use crate::scheduler::Scheduler;
use atmo_control::Orchestrator;
use prometheus::Registry;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,

    /// Scheduler handle
    pub scheduler: Arc<Scheduler>,

    /// Registry served at `/metrics`
    pub registry: Arc<Registry>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        orchestrator: Orchestrator,
        scheduler: Arc<Scheduler>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            registry,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
