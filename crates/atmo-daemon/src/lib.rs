//! ATMO Daemon library
//!
//! This module provides the core components for the ATMO daemon:
//! - REST API handlers
//! - Configuration loading
//! - Background sweep scheduler
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use scheduler::{PassKind, PassReport, Scheduler};
pub use server::Server;
