//! Controller-specific error types.
//!
//! This module defines error types specific to the Wukong Controller
//! that are not covered by upstream library errors.

use cluster_client::ClusterError;
use crds::ValidationError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Wukong Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error outside the cluster client (startup, watchers)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Error from a dependent object operation
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// The spec was rejected by static or update validation
    #[error("Invalid spec: {0}")]
    Validation(#[from] ValidationError),

    /// A step did not finish before the step timeout
    #[error("Step cancelled: {0}")]
    Cancelled(String),

    /// A dependent document could not be synthesized from the Wukong spec
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// A DataVolume or claim reached a failure phase
    #[error("Storage failed for disk {disk}: {reason}")]
    StorageFailed { disk: String, reason: String },

    /// A snapshot or restore reached a failure phase
    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    /// Object is missing required metadata
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Health and metrics server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    /// Metrics registry could not be built
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Cancellations and not-found or conflict races are retried quickly
    /// without moving the instance to `Error`.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Cluster(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ControllerError::Cancelled("networks".to_string()).is_transient());
        assert!(ControllerError::Cluster(ClusterError::NotFound("vm1-root".to_string())).is_transient());
        assert!(ControllerError::Cluster(ClusterError::Cancelled("get".to_string())).is_transient());
        assert!(!ControllerError::Synthesis("no physical interface".to_string()).is_transient());
        assert!(!ControllerError::Validation(ValidationError::NoDisks).is_transient());
        assert!(
            !ControllerError::StorageFailed {
                disk: "root".to_string(),
                reason: "import failed".to_string(),
            }
            .is_transient()
        );
    }
}
