//! JSON REST surface over the orchestrator

pub mod extract;
pub mod handlers;
pub mod router;
pub mod state;
