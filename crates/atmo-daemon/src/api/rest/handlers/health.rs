//! Health and sweep status handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::scheduler::PassKind;
use atmo_control::MaintenanceReport;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: DateTime<Utc>,
    pub scheduler_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_maintenance_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_maintenance: Option<MaintenanceReport>,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let last = state.scheduler.last_maintenance().await;

    Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        scheduler_running: state.scheduler.is_running().await,
        last_maintenance_at: last.as_ref().map(|(at, _)| *at),
        last_maintenance: last.map(|(_, report)| report),
    })
}

/// Sweep trigger request
#[derive(Debug, Deserialize)]
pub struct TriggerSweepRequest {
    pub pass: PassKind,
}

/// Queue a sweep on the background scheduler. Without a running
/// scheduler the pass runs inline and its report is returned.
pub async fn trigger_sweep(
    State(state): State<AppState>,
    Json(request): Json<TriggerSweepRequest>,
) -> ApiResult<Response> {
    if !state.scheduler.is_running().await {
        let report = state.scheduler.run_pass(request.pass).await;
        return Ok(Json(report).into_response());
    }

    if !state.scheduler.trigger(request.pass) {
        return Err(ApiError::Conflict("sweep queue is full".to_string()));
    }
    tracing::info!(pass = ?request.pass, "Sweep queued");
    Ok(StatusCode::ACCEPTED.into_response())
}
