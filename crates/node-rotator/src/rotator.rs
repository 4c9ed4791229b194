//! Per-node rotation state machine.
//!
//! ```text
//! Init -> Cordoned -> EvictLoop -> Draining -> Drained
//!                                           \-> DrainFailed
//! ```
//!
//! Cordon, eviction and drain are independent API calls. Nothing is rolled
//! back: a node interrupted mid-rotation stays in whatever state the last
//! completed call left it.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::cluster::ClusterApi;
use crate::collision::{Collision, CollisionDetector};
use crate::config::RotatorConfig;
use crate::drain::{drain_node_with_timeout, Drainer};
use crate::error::RotationError;
use crate::events::{messages, EventEmitter, EventType};
use crate::model::{ControllerKey, Pod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationState {
    Init,
    Cordoned,
    EvictLoop,
    Draining,
    Drained,
    DrainFailed,
}

impl RotationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Drained | Self::DrainFailed)
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Init => "init",
            Self::Cordoned => "cordoned",
            Self::EvictLoop => "evict-loop",
            Self::Draining => "draining",
            Self::Drained => "drained",
            Self::DrainFailed => "drain-failed",
        };
        f.write_str(state)
    }
}

/// Result of rotating one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub node: String,
    pub state: RotationState,
    /// Pods evicted to break collisions
    pub evictions: usize,
    /// Pods left on the node when the drain timed out
    pub remaining_pods: Vec<Pod>,
}

impl RotationReport {
    fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            state: RotationState::Init,
            evictions: 0,
            remaining_pods: Vec::new(),
        }
    }

    fn advance(&mut self, next: RotationState) {
        info!(node = %self.node, from = %self.state, to = %next, "Rotation state change");
        self.state = next;
    }
}

/// Rotates a single node: cordon, break collisions, drain.
#[derive(Clone)]
pub struct NodeRotator {
    cluster: Arc<dyn ClusterApi>,
    drainer: Arc<dyn Drainer>,
    detector: CollisionDetector,
    events: EventEmitter,
    config: Arc<RotatorConfig>,
}

impl NodeRotator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        drainer: Arc<dyn Drainer>,
        config: Arc<RotatorConfig>,
    ) -> Self {
        Self {
            detector: CollisionDetector::new(cluster.clone()),
            events: EventEmitter::new(cluster.clone(), config.reporting_instance.clone()),
            cluster,
            drainer,
            config,
        }
    }

    /// Run the full state machine for `node`.
    ///
    /// A drain timeout is not an error: the report ends in
    /// [`RotationState::DrainFailed`] with the pods left behind. Any other
    /// drain failure, or an exceeded Pending wait, is returned as an error.
    pub async fn rotate(&self, node: &str) -> Result<RotationReport, RotationError> {
        info!(node = %node, "Processing node");
        let mut report = RotationReport::new(node);

        self.events
            .node_event(node, messages::CORDON_INIT, EventType::Normal)
            .await;
        self.cordon(node).await;
        report.advance(RotationState::Cordoned);

        report.advance(RotationState::EvictLoop);
        report.evictions = self.resolve_collisions(node).await?;

        report.advance(RotationState::Draining);
        self.events
            .node_event(node, messages::DRAIN_START, EventType::Normal)
            .await;

        let remaining = drain_node_with_timeout(
            self.cluster.as_ref(),
            self.drainer.as_ref(),
            node,
            self.config.node_drain_timeout,
        )
        .await?;

        match remaining {
            None => {
                self.events
                    .node_event(node, messages::DRAIN_COMPLETED, EventType::Normal)
                    .await;
                report.advance(RotationState::Drained);
                info!(node = %node, "Node drained successfully");
            }
            Some(pods) => {
                report.remaining_pods = pods;
                report.advance(RotationState::DrainFailed);
            }
        }

        Ok(report)
    }

    async fn cordon(&self, node: &str) {
        info!(node = %node, "Cordoning node");
        match self.cluster.cordon_node(node).await {
            Ok(()) => info!(node = %node, "Node cordoned"),
            Err(e) => error!(node = %node, error = %e, "Failed to cordon node, continuing"),
        }
    }

    /// Evict one replica at a time until no controller has all of its
    /// replicas on `node`. Returns the number of pods evicted.
    async fn resolve_collisions(&self, node: &str) -> Result<usize, RotationError> {
        let mut evictions = 0;

        loop {
            let collision = match self.detector.find_collision(node).await {
                Ok(Some(collision)) => collision,
                Ok(None) => return Ok(evictions),
                Err(e) => {
                    warn!(node = %node, error = %e, "Collision check failed, retrying");
                    sleep(self.config.pending_poll_interval).await;
                    continue;
                }
            };

            if self.evict_first(&collision).await {
                evictions += 1;
            }

            // Give the control plane time to create the replacement before
            // its phase is inspected.
            sleep(self.config.eviction_settle).await;
            self.wait_for_none_pending(&collision.controller).await?;
        }
    }

    /// Evict only the first pod of the group. Returns false on failure.
    async fn evict_first(&self, collision: &Collision) -> bool {
        let Some(pod) = collision.pods.first() else {
            return false;
        };

        info!(pod = %pod.id(), controller = %collision.controller, "Evicting pod");
        match self.cluster.delete_pod(&pod.namespace, &pod.name).await {
            Ok(()) => {
                info!(pod = %pod.id(), "Pod evicted");
                true
            }
            Err(e) if e.is_not_found() => {
                info!(pod = %pod.id(), "Pod already gone, skipping eviction");
                true
            }
            Err(e) => {
                error!(pod = %pod.id(), error = %e, "Failed to evict pod");
                false
            }
        }
    }

    /// Block until no pod owned by `controller` is Pending.
    ///
    /// Unbounded unless `pending_wait_timeout` is configured.
    pub async fn wait_for_none_pending(
        &self,
        controller: &ControllerKey,
    ) -> Result<(), RotationError> {
        let started = Instant::now();

        loop {
            match self
                .cluster
                .list_pods_in_namespace(&controller.namespace)
                .await
            {
                Ok(pods) => {
                    let pending = pods
                        .iter()
                        .filter(|pod| pod.is_owned_by(&controller.name) && pod.is_pending())
                        .count();
                    if pending == 0 {
                        info!(controller = %controller, "No pods of controller are Pending");
                        return Ok(());
                    }
                    info!(
                        controller = %controller,
                        pending,
                        "Waiting for pods of controller to be scheduled"
                    );
                }
                Err(e) => {
                    warn!(controller = %controller, error = %e, "Failed to list pods, retrying");
                }
            }

            if let Some(limit) = self.config.pending_wait_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    return Err(RotationError::PendingWaitExceeded {
                        controller: controller.clone(),
                        waited,
                    });
                }
            }

            sleep(self.config.pending_poll_interval).await;
        }
    }
}
