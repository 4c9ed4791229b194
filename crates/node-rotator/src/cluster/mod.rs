//! Access to the cluster control plane.
//!
//! [`ClusterApi`] is the only way the rotator reads or mutates the cluster.
//! Every call goes to the API server: nothing is cached between calls, so
//! each decision is made against fresh state.

mod kube_client;

pub use kube_client::KubeCluster;

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::events::RotationEvent;
use crate::model::{Labels, Node, Pod};

/// Control-plane operations consumed by the rotator.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List nodes, optionally restricted by a `key=value` label selector.
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError>;

    /// List pods scheduled on `node`, across all namespaces.
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, ClusterError>;

    /// List pods in `namespace` carrying every label in `selector`.
    async fn list_pods_matching(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Pod>, ClusterError>;

    /// List every pod in `namespace`.
    async fn list_pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError>;

    /// List every pod in the cluster.
    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError>;

    /// List pods in the `Pending` phase, across all namespaces.
    async fn list_pending_pods(&self) -> Result<Vec<Pod>, ClusterError>;

    /// Mark `node` unschedulable.
    async fn cordon_node(&self, node: &str) -> Result<(), ClusterError>;

    /// Delete a pod. A missing pod yields [`ClusterError::NotFound`].
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Append an event to the cluster event stream.
    async fn create_event(&self, event: &RotationEvent) -> Result<(), ClusterError>;
}

/// Render labels as an equality selector (`a=1,b=2`).
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
