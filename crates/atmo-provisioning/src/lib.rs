//! ATMO Provisioning - Cloud provisioning client
//!
//! Thin adapter between the orchestrator and the cloud compute API. The
//! orchestrator only ever talks to the [`ClusterProvisioner`] trait; the
//! concrete client is constructed once at startup and injected.
//!
//! Two implementations ship with the crate:
//!
//! - [`EmrProvisioner`]: Amazon EMR over its JSON protocol, SigV4 signed
//! - [`InMemoryProvisioner`]: simulated clusters for development and tests

#![deny(unsafe_code)]

pub mod emr;
pub mod error;
pub mod memory;
pub mod provisioner;

pub use emr::{AwsCredentials, EmrConfig, EmrProvisioner};
pub use error::{ProvisioningError, Result};
pub use memory::InMemoryProvisioner;
pub use provisioner::{instance_groups, ClusterProvisioner, ClusterSpec, InstanceGroup, JobStep, MarketType};
