//! Cluster handlers

use super::DeleteResponse;
use crate::api::rest::extract::{parse_id, ActingUser};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use atmo_types::{Cluster, ClusterId, ClusterRequest, ClusterUpdate};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

/// List the acting user's clusters
pub async fn list_clusters(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
) -> ApiResult<Json<Vec<Cluster>>> {
    Ok(Json(state.orchestrator.list_clusters(&user).await?))
}

/// Provision a new cluster
pub async fn create_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Json(request): Json<ClusterRequest>,
) -> ApiResult<(StatusCode, Json<Cluster>)> {
    let cluster = state.orchestrator.create_cluster(request, &user).await?;
    Ok((StatusCode::CREATED, Json(cluster)))
}

pub async fn get_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Cluster>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    Ok(Json(state.orchestrator.get_cluster(&id, &user).await?))
}

/// Fetch the remote status now instead of waiting for the next sweep
pub async fn refresh_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Cluster>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    Ok(Json(state.orchestrator.refresh_cluster(&id, &user).await?))
}

pub async fn rename_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
    Json(update): Json<ClusterUpdate>,
) -> ApiResult<Json<Cluster>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    Ok(Json(state.orchestrator.rename_cluster(&id, &user, update).await?))
}

/// Extend cluster request
#[derive(Debug, Deserialize)]
pub struct ExtendClusterRequest {
    pub hours: u32,
}

pub async fn extend_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
    Json(request): Json<ExtendClusterRequest>,
) -> ApiResult<Json<Cluster>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    Ok(Json(
        state
            .orchestrator
            .extend_cluster(&id, &user, request.hours)
            .await?,
    ))
}

/// Stop the remote cluster, keeping the record
pub async fn terminate_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Cluster>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    Ok(Json(state.orchestrator.terminate_cluster(&id, &user).await?))
}

/// Stop the remote cluster and drop the record
pub async fn delete_cluster(
    State(state): State<AppState>,
    ActingUser(user): ActingUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let id: ClusterId = parse_id(&id, "cluster")?;
    state.orchestrator.delete_cluster(&id, &user).await?;
    Ok(Json(DeleteResponse { deleted: true }))
}
