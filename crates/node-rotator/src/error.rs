//! Error types for node rotation.

use std::time::Duration;

use thiserror::Error;

use crate::model::ControllerKey;

/// Failures talking to the cluster control plane.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The object does not exist (HTTP 404).
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Cluster unavailable: {0}")]
    Unavailable(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Failures of the external drain operation.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Drain of node {node} exceeded {}s", timeout.as_secs())]
    TimedOut { node: String, timeout: Duration },

    #[error("Drain of node {node} failed (exit code {code:?}): {stderr}")]
    Failed {
        node: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to launch drain command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Failures that abort the rotation of a single node.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Drain(#[from] DrainError),

    #[error("Pods of {controller} still Pending after {}s", waited.as_secs())]
    PendingWaitExceeded {
        controller: ControllerKey,
        waited: Duration,
    },
}

/// Invalid configuration values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid critical workload selector '{0}': expected label=value")]
    InvalidSelector(String),
}
