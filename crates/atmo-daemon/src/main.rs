//! ATMO Daemon - Spark cluster and scheduled job orchestration
//!
//! The ATMO daemon provides:
//! - REST API for clusters, scheduled jobs and their runs
//! - A frequent status pass mirroring remote cluster state
//! - An hourly maintenance pass launching, timing out and expiring work

use atmo_daemon::{DaemonConfig, DaemonError, DaemonResult, PassKind, Server};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ATMO Daemon CLI
#[derive(Parser)]
#[command(name = "atmod")]
#[command(about = "ATMO Daemon - Spark cluster and scheduled job orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ATMO_CONFIG")]
    config: Option<String>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "ATMO_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level
    #[arg(long, env = "ATMO_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ATMO_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run the sweep loops (default)
    Serve,

    /// Run one sweep pass, print its report and exit
    Sweep {
        #[arg(value_enum, default_value = "maintenance")]
        pass: PassArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PassArg {
    Status,
    Maintenance,
}

impl From<PassArg> for PassKind {
    fn from(arg: PassArg) -> Self {
        match arg {
            PassArg::Status => PassKind::Status,
            PassArg::Maintenance => PassKind::Maintenance,
        }
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address: {}", e)))?;
    }

    let server = Server::new(config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ATMO daemon");
            server.run().await
        }
        Command::Sweep { pass } => {
            let report = server.run_once(pass.into()).await;
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|e| DaemonError::Server(e.to_string()))?;
            println!("{}", rendered);
            Ok(())
        }
    }
}
