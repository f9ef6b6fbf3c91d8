//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request was interrupted before the API server answered
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object returned by the API server is missing required fields
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    /// Whether retrying the same request later can succeed without user action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Conflict(_) | Self::Cancelled(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(response.message.clone()),
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(response.message.clone()),
            kube::Error::HyperError(e) => Self::Cancelled(e.to_string()),
            kube::Error::Service(e) => Self::Cancelled(e.to_string()),
            _ => Self::Kube(error),
        }
    }
}
