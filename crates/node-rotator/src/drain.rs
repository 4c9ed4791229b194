//! External, time-bounded node drain.
//!
//! Pod eviction policy (PodDisruptionBudgets, grace periods, daemonset
//! handling) is left to `kubectl drain`. The rotator only bounds how long it
//! waits and reports what is left behind when the bound is hit.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::error::DrainError;
use crate::model::Pod;

/// Runs a drain of one node, bounded by `timeout`.
#[async_trait]
pub trait Drainer: Send + Sync {
    /// Drain `node`. Exceeding `timeout` yields [`DrainError::TimedOut`].
    async fn drain(&self, node: &str, timeout: Duration) -> Result<(), DrainError>;
}

/// Drains through `kubectl drain`, ignoring daemonset-managed pods and
/// permitting deletion of pods that use `emptyDir` storage.
#[derive(Debug, Clone)]
pub struct KubectlDrainer {
    program: String,
}

impl Default for KubectlDrainer {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlDrainer {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn drain_args(node: &str) -> Vec<String> {
        vec![
            "drain".to_string(),
            node.to_string(),
            "--ignore-daemonsets".to_string(),
            "--delete-emptydir-data".to_string(),
        ]
    }
}

#[async_trait]
impl Drainer for KubectlDrainer {
    async fn drain(&self, node: &str, timeout: Duration) -> Result<(), DrainError> {
        info!(node = %node, timeout_secs = timeout.as_secs(), "Draining node");

        let mut command = Command::new(&self.program);
        command
            .args(Self::drain_args(node))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        let Ok(output) = tokio::time::timeout(timeout, command.output()).await else {
            return Err(DrainError::TimedOut {
                node: node.to_string(),
                timeout,
            });
        };
        let output = output?;

        if output.status.success() {
            debug!(
                node = %node,
                stdout = %String::from_utf8_lossy(&output.stdout),
                "kubectl drain output"
            );
            Ok(())
        } else {
            Err(DrainError::Failed {
                node: node.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Drain `node` within `timeout`.
///
/// Returns `Ok(None)` when the drain completed and `Ok(Some(pods))` with the
/// pods still scheduled on the node when the timeout was hit. Any other
/// failure is returned unchanged.
pub async fn drain_node_with_timeout(
    cluster: &dyn ClusterApi,
    drainer: &dyn Drainer,
    node: &str,
    timeout: Duration,
) -> Result<Option<Vec<Pod>>, DrainError> {
    match drainer.drain(node, timeout).await {
        Ok(()) => Ok(None),
        Err(DrainError::TimedOut { .. }) => {
            let remaining = cluster.list_pods_on_node(node).await?;
            warn!(
                node = %node,
                timeout_secs = timeout.as_secs(),
                remaining = remaining.len(),
                "Drain timed out with pods still on node"
            );
            for pod in &remaining {
                warn!(node = %node, pod = %pod.id(), "Pod still present after drain timeout");
            }
            Ok(Some(remaining))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pod, FakeCluster, FakeDrain, FakeDrainer};

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_drain_success_returns_none() {
        let cluster = FakeCluster::new(vec![], vec![]);
        let drainer = FakeDrainer::default();

        let result = drain_node_with_timeout(&cluster, &drainer, "test-node", TIMEOUT)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(drainer.drained(), vec![("test-node".to_string(), TIMEOUT)]);
    }

    #[tokio::test]
    async fn test_drain_timeout_returns_remaining_pods() {
        let cluster = FakeCluster::new(
            vec![],
            vec![
                pod("default", "pod1", "test-node"),
                pod("default", "pod2", "test-node"),
                pod("default", "elsewhere", "other-node"),
            ],
        );
        let drainer = FakeDrainer::default().script("test-node", FakeDrain::TimeOut);

        let remaining = drain_node_with_timeout(&cluster, &drainer, "test-node", TIMEOUT)
            .await
            .unwrap()
            .unwrap();

        let names: Vec<_> = remaining.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["pod1", "pod2"]);
    }

    #[tokio::test]
    async fn test_drain_failure_propagates() {
        let cluster = FakeCluster::new(vec![], vec![]);
        let drainer = FakeDrainer::default().script("test-node", FakeDrain::Fail);

        let err = drain_node_with_timeout(&cluster, &drainer, "test-node", TIMEOUT)
            .await
            .unwrap_err();

        assert!(matches!(err, DrainError::Failed { code: Some(1), .. }));
    }

    #[test]
    fn test_kubectl_drain_args() {
        assert_eq!(
            KubectlDrainer::drain_args("node-a"),
            vec![
                "drain",
                "node-a",
                "--ignore-daemonsets",
                "--delete-emptydir-data"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_drainer_exit_status() {
        let ok = KubectlDrainer::new("true");
        assert!(ok.drain("node-a", TIMEOUT).await.is_ok());

        let failing = KubectlDrainer::new("false");
        let err = failing.drain("node-a", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, DrainError::Failed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_kubectl_drainer_missing_binary() {
        let drainer = KubectlDrainer::new("definitely-not-a-real-kubectl-binary");
        let err = drainer.drain("node-a", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, DrainError::Spawn(_)));
    }
}
