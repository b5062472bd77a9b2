//! Error types for the provisioning client

use thiserror::Error;

/// Provisioning client error type
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// The provider rejected the request
    #[error("Provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The remote handle does not resolve to a cluster
    #[error("Remote cluster not found: {0}")]
    NotFound(String),

    /// The request never produced a provider answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with something we cannot read
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Client misconfiguration (credentials, endpoint)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProvisioningError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisioningError::NotFound(_))
    }
}

impl From<reqwest::Error> for ProvisioningError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProvisioningError::InvalidResponse(err.to_string())
        } else {
            ProvisioningError::Transport(err.to_string())
        }
    }
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisioningError>;
