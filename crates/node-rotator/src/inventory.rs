//! Managed node discovery and classification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::config::CriticalSelector;
use crate::error::ClusterError;
use crate::model::{Node, Pod};

/// Eligible nodes split by whether they host critical workloads.
///
/// The two lists are disjoint and both only contain nodes that passed the
/// age check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeClassification {
    pub critical: Vec<String>,
    pub non_critical: Vec<String>,
}

impl NodeClassification {
    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.non_critical.is_empty()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.critical.iter().chain(&self.non_critical).any(|n| n == node)
    }

    /// Remove `node` from both lists. Idempotent; `None` is a no-op.
    #[must_use]
    pub fn exclude(mut self, node: Option<&str>) -> Self {
        if let Some(node) = node {
            self.critical.retain(|n| n != node);
            self.non_critical.retain(|n| n != node);
        }
        self
    }
}

/// Read-only view over the nodes this job manages.
#[derive(Clone)]
pub struct NodeInventory {
    cluster: Arc<dyn ClusterApi>,
    managed_selector: String,
}

impl NodeInventory {
    pub fn new(cluster: Arc<dyn ClusterApi>, managed_selector: impl Into<String>) -> Self {
        Self {
            cluster,
            managed_selector: managed_selector.into(),
        }
    }

    /// Nodes carrying the managed-by label.
    pub async fn list_managed_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        info!(selector = %self.managed_selector, "Retrieving managed nodes");
        let nodes = self
            .cluster
            .list_nodes(Some(&self.managed_selector))
            .await?;
        info!(count = nodes.len(), "Found managed nodes");
        Ok(nodes)
    }

    /// Split nodes older than `min_age_days + 1` days into critical and
    /// non-critical. Younger nodes land in neither list.
    ///
    /// A node whose pods cannot be listed is left out of both lists for this
    /// run; rotating it blind could take down a critical workload.
    pub async fn classify(
        &self,
        nodes: &[Node],
        min_age_days: u32,
        selectors: &[CriticalSelector],
        now: DateTime<Utc>,
    ) -> NodeClassification {
        let mut classification = NodeClassification::default();

        for node in nodes {
            if !node.is_older_than(min_age_days, now) {
                info!(
                    node = %node.name,
                    min_age_days,
                    "Node is not old enough, skipping"
                );
                continue;
            }

            match self.runs_critical_pods(&node.name, selectors).await {
                Ok(true) => classification.critical.push(node.name.clone()),
                Ok(false) => classification.non_critical.push(node.name.clone()),
                Err(e) => {
                    warn!(
                        node = %node.name,
                        error = %e,
                        "Failed to list pods on node, leaving it out of this run"
                    );
                }
            }
        }

        classification
    }

    /// Whether any pod on `node` matches any selector.
    pub async fn runs_critical_pods(
        &self,
        node: &str,
        selectors: &[CriticalSelector],
    ) -> Result<bool, ClusterError> {
        let pods = self.cluster.list_pods_on_node(node).await?;
        let critical = pods.iter().find(|pod| is_critical_pod(pod, selectors));
        if let Some(pod) = critical {
            debug!(node = %node, pod = %pod.id(), "Node hosts a critical workload");
        }
        Ok(critical.is_some())
    }
}

pub fn is_critical_pod(pod: &Pod, selectors: &[CriticalSelector]) -> bool {
    selectors.iter().any(|s| s.matches(&pod.labels))
}

/// Node hosting the first Running pod whose name contains `substring`.
pub fn locate_self_node(pods: &[Pod], substring: &str) -> Option<String> {
    pods.iter()
        .find(|pod| pod.name.contains(substring) && pod.is_running())
        .and_then(|pod| pod.node_name.clone())
}
