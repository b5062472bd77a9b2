//! Background sweep loops
//!
//! The scheduler is responsible for:
//! - Mirroring remote cluster state every status interval
//! - Running the full maintenance pass every maintenance interval
//! - On-demand passes triggered through the API

mod runner;

pub use runner::{PassKind, PassReport, Scheduler};
