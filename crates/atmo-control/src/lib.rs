//! ATMO Control - Cluster and scheduled job lifecycle orchestration
//!
//! The [`Orchestrator`] owns every state transition of user clusters, Spark
//! jobs and their runs. It talks to the cloud provider through a
//! [`ClusterProvisioner`](atmo_provisioning::ClusterProvisioner), persists
//! through a [`Storage`](atmo_store::Storage) backend and notifies owners
//! through a [`Notifier`].
//!
//! ## Operations
//!
//! - User cluster lifecycle: create, refresh, rename, extend, terminate, delete
//! - Spark job lifecycle: create, edit, run now, delete
//! - Reconciliation: [`Orchestrator::status_pass`] mirrors remote state,
//!   [`Orchestrator::maintenance_pass`] runs every sweep step
//!
//! All date logic reads the current instant through a [`Clock`]. Usage
//! counters go to an optional [`AtmoMetrics`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod clock;
mod clusters;
pub mod error;
mod jobs;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod reconcile;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ControlError, Result};
pub use metrics::AtmoMetrics;
pub use notify::{
    LogNotifier, Mailer, Notification, NotificationSettings, Notifier, NotifyError,
    RecordingNotifier, WebhookNotifier,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use reconcile::{MaintenanceReport, StatusReport, SweepReport};
