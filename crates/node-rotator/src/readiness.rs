//! Waiting for replacement capacity.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::config::RotatorConfig;
use crate::model::Node;

/// Names of nodes that are absent from `original` and report Ready.
pub fn new_ready_nodes(nodes: &[Node], original: &BTreeSet<String>) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| !original.contains(&node.name) && node.is_ready())
        .map(|node| node.name.clone())
        .collect()
}

/// Polls for new, ready nodes with a bounded number of cycles.
#[derive(Clone)]
pub struct ReadinessWaiter {
    cluster: Arc<dyn ClusterApi>,
    min_ready_nodes: usize,
    total_wait_cycles: u32,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: &RotatorConfig) -> Self {
        Self {
            cluster,
            min_ready_nodes: config.min_ready_nodes,
            total_wait_cycles: config.total_wait_cycles,
            poll_interval: config.readiness_poll_interval,
        }
    }

    /// Wait until at least `min_ready_nodes` new nodes are Ready.
    ///
    /// Never fails: when the cycles run out, whatever the last successful
    /// poll found (possibly nothing) is returned and the caller carries on.
    pub async fn wait_for_new_nodes(&self, original: &BTreeSet<String>) -> Vec<String> {
        info!(
            min_ready_nodes = self.min_ready_nodes,
            cycles = self.total_wait_cycles,
            "Waiting for new nodes to become ready"
        );
        let mut ready = Vec::new();

        for cycle in 1..=self.total_wait_cycles {
            match self.cluster.list_nodes(None).await {
                Ok(nodes) => {
                    ready = new_ready_nodes(&nodes, original);
                    if ready.len() >= self.min_ready_nodes {
                        info!(
                            found = ready.len(),
                            required = self.min_ready_nodes,
                            "Enough new ready nodes"
                        );
                        return ready;
                    }
                    info!(
                        cycle,
                        found = ready.len(),
                        required = self.min_ready_nodes,
                        "Not enough new ready nodes yet"
                    );
                }
                Err(e) => warn!(cycle, error = %e, "Failed to list nodes"),
            }

            if cycle < self.total_wait_cycles {
                sleep(self.poll_interval).await;
            }
        }

        warn!(
            found = ready.len(),
            required = self.min_ready_nodes,
            "Gave up waiting for new ready nodes"
        );
        ready
    }
}
