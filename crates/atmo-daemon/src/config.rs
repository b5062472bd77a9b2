//! Configuration for atmod

use atmo_control::NotificationSettings;
use atmo_provisioning::EmrConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Cloud provider selection
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            enable_cors: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Background sweep cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the background loops at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Status pass interval in seconds
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Maintenance pass interval in seconds
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            status_interval_secs: default_status_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

/// Cloud provider selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProvisioningConfig {
    /// Simulated clusters that walk through their lifecycle on their own
    #[default]
    Memory,

    /// Amazon EMR, credentials from the standard AWS environment variables
    Emr(EmrConfig),
}

/// Outbound notification transport
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    /// Write notifications to the log
    #[default]
    Log,

    /// POST notifications as JSON to a mail relay
    Webhook {
        url: String,

        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub transport: NotifierConfig,

    #[serde(default = "default_from_address")]
    pub from_address: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Copy the sender on every message
    #[serde(default = "default_true")]
    pub cc_sender: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        let settings = NotificationSettings::default();
        Self {
            transport: NotifierConfig::default(),
            from_address: settings.from_address,
            subject_prefix: settings.subject_prefix,
            cc_sender: settings.cc_sender,
        }
    }
}

impl NotificationsConfig {
    pub fn settings(&self) -> NotificationSettings {
        NotificationSettings {
            from_address: self.from_address.clone(),
            subject_prefix: self.subject_prefix.clone(),
            cc_sender: self.cc_sender,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_status_interval() -> u64 {
    300
}

fn default_maintenance_interval() -> u64 {
    3600
}

fn default_webhook_timeout() -> u64 {
    10
}

fn default_from_address() -> String {
    NotificationSettings::default().from_address
}

fn default_subject_prefix() -> String {
    NotificationSettings::default().subject_prefix
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Layer defaults, an optional file and `ATMO_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `ATMO_SCHEDULER__STATUS_INTERVAL_SECS=60`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ATMO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
