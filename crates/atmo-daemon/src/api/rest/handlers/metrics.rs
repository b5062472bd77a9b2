//! Prometheus scrape endpoint

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, Registry, TextEncoder};

/// Render every registered metric in the text exposition format
pub fn export_metrics(registry: &Registry) -> ApiResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| ApiError::Internal(e.to_string()))
}

/// Handler for GET /metrics
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Response> {
    let body = export_metrics(&state.registry)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
