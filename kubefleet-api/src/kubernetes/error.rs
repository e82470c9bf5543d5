//! Kubernetes error types and ApiError mapping
//!
//! Maps kube-rs, credential and monitoring failures to API errors.

use crate::error::ApiError;
use thiserror::Error;

/// Errors raised while talking to the registry, member clusters or their
/// monitoring backends
#[derive(Debug, Error)]
pub enum K8sError {
    /// Cluster not found in registry
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    /// Stored kubeconfig could not be turned into a client
    #[error("Invalid credential for cluster {cluster}: {reason}")]
    InvalidCredential { cluster: String, reason: String },

    /// Malformed request parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Member cluster or monitoring endpoint unreachable or timed out
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Some elements of a batch failed while the rest completed
    #[error("Partial failure: {failed} of {total} clusters not reconciled")]
    PartialFailure { failed: usize, total: usize },

    /// Resource already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A single named metric could not be queried
    #[error("Monitoring query failed: {0}")]
    MonitoringQuery(String),

    /// Error from kube-rs client
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl K8sError {
    pub fn invalid_credential(cluster: &str, reason: impl std::fmt::Display) -> Self {
        K8sError::InvalidCredential {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status carried by a kube API error, if any
    pub fn api_status(&self) -> Option<u16> {
        match self {
            K8sError::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }
}

impl From<K8sError> for ApiError {
    fn from(err: K8sError) -> Self {
        match err {
            K8sError::ClusterNotFound(id) => {
                ApiError::NotFound(format!("Kubernetes cluster '{}' not found", id))
            }
            K8sError::InvalidCredential { cluster, reason } => ApiError::ValidationError(format!(
                "Kubeconfig for cluster '{}' is invalid: {}",
                cluster, reason
            )),
            K8sError::InvalidInput(msg) => ApiError::BadRequest(msg),
            K8sError::UpstreamUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            K8sError::Conflict(msg) => ApiError::Conflict(msg),
            K8sError::KubeError(kube::Error::Api(response)) => match response.code {
                401 => ApiError::AuthenticationFailed,
                403 => ApiError::Forbidden(response.message),
                404 => ApiError::NotFound(response.message),
                409 => ApiError::Conflict(response.message),
                400 | 422 => ApiError::ValidationError(response.message),
                429 => ApiError::RateLimited(response.message),
                503 => ApiError::ServiceUnavailable(response.message),
                _ => ApiError::Internal(format!("Kubernetes error: {}", response.message)),
            },
            K8sError::KubeError(e) => {
                ApiError::ServiceUnavailable(format!("Kubernetes API unreachable: {}", e))
            }
            err @ K8sError::PartialFailure { .. } => ApiError::Internal(err.to_string()),
            K8sError::MonitoringQuery(msg) => ApiError::ServiceUnavailable(msg),
            K8sError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Result type alias for Kubernetes operations
pub type K8sResult<T> = std::result::Result<T, K8sError>;
