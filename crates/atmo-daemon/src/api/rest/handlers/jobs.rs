//! Scheduled Spark job handlers

use super::DeleteResponse;
use crate::api::rest::extract::{parse_id, ActingUser};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use atmo_control::RunOutcome;
use atmo_types::{Schedule, SparkJob, SparkJobForm, SparkJobId, SparkJobRun};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Job with its scheduling state
#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: SparkJob,

    /// `due`, `disabled`, `not_started`, `expired`, `running` or `not_yet_due`
    pub schedule: &'static str,

    /// When the job becomes due next, if it is waiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl JobDetail {
    fn new(job: SparkJob, schedule: Schedule) -> Self {
        let (label, next_run_at) = match schedule {
            Schedule::Due => ("due", None),
            Schedule::Disabled => ("disabled", None),
            Schedule::NotStarted { starts_at } => ("not_started", Some(starts_at)),
            Schedule::Expired { .. } => ("expired", None),
            Schedule::Running { .. } => ("running", None),
            Schedule::NotYetDue { next_run_at } => ("not_yet_due", Some(next_run_at)),
        };
        Self {
            job,
            schedule: label,
            next_run_at,
        }
    }
}

/// Run now response
#[derive(Debug, Serialize)]
pub struct RunJobResponse {
    /// False when a run was already active
    pub started: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<SparkJobRun>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
) -> ApiResult<Json<Vec<SparkJob>>> {
    Ok(Json(state.orchestrator.list_jobs(&user).await?))
}

pub async fn create_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Json(form): Json<SparkJobForm>,
) -> ApiResult<(StatusCode, Json<SparkJob>)> {
    let job = state.orchestrator.create_job(form, &user).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<JobDetail>> {
    let id: SparkJobId = parse_id(&id, "job")?;
    let job = state.orchestrator.get_job(&id, &user).await?;
    let schedule = state.orchestrator.job_schedule(&job).await?;
    Ok(Json(JobDetail::new(job, schedule)))
}

pub async fn update_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
    Json(form): Json<SparkJobForm>,
) -> ApiResult<Json<SparkJob>> {
    let id: SparkJobId = parse_id(&id, "job")?;
    Ok(Json(state.orchestrator.edit_job(&id, &user, form).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let id: SparkJobId = parse_id(&id, "job")?;
    state.orchestrator.delete_job(&id, &user).await?;
    Ok(Json(DeleteResponse { deleted: true }))
}

/// Start a run now, ignoring the schedule
pub async fn run_job(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<RunJobResponse>)> {
    let id: SparkJobId = parse_id(&id, "job")?;
    let response = match state.orchestrator.run_job_now(&id, &user).await? {
        RunOutcome::Started(run) => (
            StatusCode::CREATED,
            Json(RunJobResponse {
                started: true,
                run: Some(run),
            }),
        ),
        RunOutcome::AlreadyRunning => (
            StatusCode::OK,
            Json(RunJobResponse {
                started: false,
                run: None,
            }),
        ),
    };
    Ok(response)
}

/// Run history, newest first
pub async fn list_job_runs(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SparkJobRun>>> {
    let id: SparkJobId = parse_id(&id, "job")?;
    Ok(Json(state.orchestrator.list_runs(&id, &user).await?))
}
