//! API request handlers

mod clusters;
mod health;
mod jobs;
mod metrics;

pub use clusters::*;
pub use health::*;
pub use jobs::*;
pub use metrics::*;

use serde::Serialize;

/// Delete response
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}
