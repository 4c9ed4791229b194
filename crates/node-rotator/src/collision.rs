//! Controller collision detection.
//!
//! A *collision* is a controller whose entire current replica set sits on a
//! single node: removing that node would take the workload down completely.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::error::ClusterError;
use crate::model::{ControllerKey, Pod, PodId};

/// A controller with every replica on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub controller: ControllerKey,
    /// The controller's pods on the node, in listing order
    pub pods: Vec<Pod>,
}

/// Group pods by owning controller. Pods without owners are dropped; a pod
/// with several owners joins each owner's group.
pub fn group_by_controller(pods: Vec<Pod>) -> BTreeMap<ControllerKey, Vec<Pod>> {
    let mut groups: BTreeMap<ControllerKey, Vec<Pod>> = BTreeMap::new();
    for pod in pods {
        for owner in &pod.owner_references {
            groups
                .entry(ControllerKey::new(owner, &pod.namespace))
                .or_default()
                .push(pod.clone());
        }
    }
    groups
}

fn same_pods(a: &[Pod], b: &[Pod]) -> bool {
    let a: BTreeSet<PodId> = a.iter().map(Pod::id).collect();
    let b: BTreeSet<PodId> = b.iter().map(Pod::id).collect();
    a == b
}

/// Read-only collision check. Safe to call repeatedly.
#[derive(Clone)]
pub struct CollisionDetector {
    cluster: Arc<dyn ClusterApi>,
}

impl CollisionDetector {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    /// Find a controller whose full replica set is on `node`.
    ///
    /// Groups are examined in [`ControllerKey`] order, so when several
    /// controllers collide at once the lexically smallest is reported first.
    /// The cluster-wide replica set is found by selecting on every label of
    /// the group's first pod.
    pub async fn find_collision(&self, node: &str) -> Result<Option<Collision>, ClusterError> {
        info!(node = %node, "Checking controller replicas on node");
        let pods = self.cluster.list_pods_on_node(node).await?;

        for (controller, members) in group_by_controller(pods) {
            if members.len() < 2 {
                continue;
            }

            let selector = members[0].labels.clone();
            let replicas = self
                .cluster
                .list_pods_matching(&controller.namespace, &selector)
                .await?;

            debug!(
                node = %node,
                controller = %controller,
                on_node = members.len(),
                cluster_wide = replicas.len(),
                "Comparing replica sets"
            );

            if same_pods(&members, &replicas) {
                info!(
                    node = %node,
                    controller = %controller,
                    replicas = members.len(),
                    "All replicas of controller are on node"
                );
                return Ok(Some(Collision {
                    controller,
                    pods: members,
                }));
            }
        }

        info!(node = %node, "No controller has all of its replicas on node");
        Ok(None)
    }
}
