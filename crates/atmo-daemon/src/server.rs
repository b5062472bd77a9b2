//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, NotifierConfig, ProvisioningConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::{PassKind, PassReport, Scheduler};
use atmo_control::{
    AtmoMetrics, LogNotifier, Mailer, Notifier, Orchestrator, SystemClock, WebhookNotifier,
};
use atmo_provisioning::{AwsCredentials, ClusterProvisioner, EmrProvisioner, InMemoryProvisioner};
use atmo_store::{InMemoryStorage, PostgresStorage, Storage};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// ATMO daemon server
pub struct Server {
    config: DaemonConfig,
    orchestrator: Orchestrator,
    scheduler: Arc<Scheduler>,
    registry: Arc<Registry>,
    trigger_rx: mpsc::Receiver<PassKind>,
}

impl Server {
    /// Wire storage, provider and notifier from the configuration
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let storage = build_storage(&config.storage).await?;
        let provisioner = build_provisioner(&config.provisioning)?;
        let notifier = build_notifier(&config.notifications.transport)?;

        let registry = Arc::new(Registry::new());
        let metrics = AtmoMetrics::new(&registry)?;

        let orchestrator = Orchestrator::new(
            storage,
            provisioner,
            Mailer::new(notifier, config.notifications.settings()),
            Arc::new(SystemClock),
        )
        .with_metrics(Arc::new(metrics));

        let (scheduler, trigger_rx) = Scheduler::new(config.scheduler.clone(), orchestrator.clone());

        Ok(Self {
            config,
            orchestrator,
            scheduler,
            registry,
            trigger_rx,
        })
    }

    /// Run a single pass and return its report
    pub async fn run_once(&self, kind: PassKind) -> PassReport {
        self.scheduler.run_pass(kind).await
    }

    /// Serve the API and drive the sweep loops until shutdown
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(
            self.orchestrator.clone(),
            self.scheduler.clone(),
            self.registry.clone(),
        );
        let app = create_router(state, &self.config.server);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!("ATMO daemon listening on {}", addr);

        let scheduler_handle = if self.config.scheduler.enabled {
            let scheduler = self.scheduler.clone();
            let trigger_rx = self.trigger_rx;
            Some(tokio::spawn(async move {
                scheduler.start(trigger_rx).await;
            }))
        } else {
            tracing::warn!("Background sweeps disabled");
            None
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("ATMO daemon shutting down");

        self.scheduler.stop().await;
        if let Some(handle) = scheduler_handle {
            self.scheduler.wait_idle().await;
            handle.abort();
        }

        Ok(())
    }
}

async fn build_storage(config: &StorageConfig) -> DaemonResult<Arc<dyn Storage>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage, state is lost on restart");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let storage =
                PostgresStorage::new(url, *max_connections, *connect_timeout_secs).await?;
            Ok(Arc::new(storage))
        }
    }
}

fn build_provisioner(config: &ProvisioningConfig) -> DaemonResult<Arc<dyn ClusterProvisioner>> {
    match config {
        ProvisioningConfig::Memory => {
            tracing::warn!("Using simulated clusters");
            Ok(Arc::new(InMemoryProvisioner::simulated()))
        }
        ProvisioningConfig::Emr(emr) => {
            let credentials = AwsCredentials::from_env()?;
            tracing::info!(region = %emr.region, "Using Amazon EMR");
            Ok(Arc::new(EmrProvisioner::new(emr.clone(), credentials)?))
        }
    }
}

fn build_notifier(config: &NotifierConfig) -> DaemonResult<Arc<dyn Notifier>> {
    match config {
        NotifierConfig::Log => Ok(Arc::new(LogNotifier)),
        NotifierConfig::Webhook { url, timeout_secs } => {
            let notifier = WebhookNotifier::new(url.clone(), Duration::from_secs(*timeout_secs))
                .map_err(|e| DaemonError::Config(e.to_string()))?;
            Ok(Arc::new(notifier))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
