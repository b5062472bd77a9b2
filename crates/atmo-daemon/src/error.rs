//! Error types for atmod

use atmo_control::ControlError;
use atmo_provisioning::ProvisioningError;
use atmo_store::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Provider client could not be built
    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// Metrics registry rejected a collector
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or unusable acting user
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rejected form input, one entry per field
    #[error("Validation error: {0}")]
    Validation(atmo_types::ValidationError),

    /// The cloud provider failed the request
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Validation(e) => ApiError::Validation(e),
            ControlError::NotFound(what) => ApiError::NotFound(what),
            ControlError::PermissionDenied(what) => ApiError::PermissionDenied(what),
            ControlError::Provisioning(ProvisioningError::NotFound(handle)) => {
                ApiError::NotFound(format!("Remote cluster {}", handle))
            }
            ControlError::Provisioning(e) => ApiError::Provisioning(e.to_string()),
            ControlError::Storage(e) => ApiError::Storage(e),
            ControlError::AlreadyProvisioned(e) => ApiError::Conflict(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Provisioning(_) => (StatusCode::BAD_GATEWAY, "PROVISIONING_ERROR"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Storage(StorageError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let details = match &self {
            ApiError::Validation(e) => serde_json::to_value(&e.errors).ok(),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use atmo_types::ValidationError;

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::PermissionDenied("test".to_string()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Storage(StorageError::Conflict("run".to_string()))
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_control_errors_map_to_http() {
        let validation: ApiError =
            ControlError::Validation(ValidationError::field("size", "too big")).into();
        assert_eq!(
            validation.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let rejected: ApiError = ControlError::Provisioning(ProvisioningError::Rejected {
            code: "ValidationException".to_string(),
            message: "bad instance type".to_string(),
        })
        .into();
        assert_eq!(rejected.into_response().status(), StatusCode::BAD_GATEWAY);

        let vanished: ApiError =
            ControlError::Provisioning(ProvisioningError::NotFound("j-1".to_string())).into();
        assert_eq!(vanished.into_response().status(), StatusCode::NOT_FOUND);
    }
}
