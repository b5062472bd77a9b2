//! ATMO Store - Persistence layer
//!
//! Storage for clusters, scheduled jobs and their runs. The orchestrator
//! works against the [`Storage`] trait; two backends are provided:
//!
//! - [`InMemoryStorage`]: development mode and tests
//! - [`PostgresStorage`]: production, via sqlx
//!
//! Both backends refuse to hold more than one non-final run per job and
//! report the attempt as [`StorageError::Conflict`].

#![deny(unsafe_code)]

mod error;
mod memory;
mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::{ClusterStorage, RunStorage, SparkJobStorage, Storage, Updated};
