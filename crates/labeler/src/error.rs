//! Error types for cluster calls and reconciliation runs
//!
//! [`ApiError`] describes one failed Kubernetes call and whether it is worth
//! retrying. [`ReconcileError`] is reserved for failures that end a run or a
//! listing before any per-resource work happens.

use thiserror::Error;

/// Failure of a single cluster API call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Transient API failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Write conflict on {resource}: resource version is stale")]
    Conflict { resource: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("API request rejected: {status} - {message}")]
    Rejected { status: u16, message: String },
}

impl ApiError {
    /// Network, timeout and rate-limit failures are worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient { .. } | ApiError::Timeout { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }

    /// Classify a kube client error by HTTP status
    #[must_use]
    pub fn from_kube(operation: &str, resource: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                409 => ApiError::Conflict {
                    resource: resource.to_string(),
                },
                404 => ApiError::NotFound {
                    resource: resource.to_string(),
                },
                429 | 500..=599 => ApiError::Transient {
                    operation: operation.to_string(),
                    message: response.message,
                },
                status => ApiError::Rejected {
                    status,
                    message: response.message,
                },
            },
            other => ApiError::Transient {
                operation: operation.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Run-level failures
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to enumerate namespaces: {0}")]
    FatalEnumeration(#[source] ApiError),

    #[error("Configuration error: {0}")]
    Config(#[from] labeler_config::ConfigError),

    #[error("Invalid business category '{0}': must be a non-empty label value")]
    InvalidCategory(String),

    #[error("Failed to list labelled controllers: {0}")]
    Listing(#[source] ApiError),
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
