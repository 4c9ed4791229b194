//! Multi-phase rotation plan.
//!
//! 1. Find the node the job itself runs on.
//! 2. Classify managed nodes into critical and non-critical.
//! 3. Stop early when nothing is old enough.
//! 4. Drop the job's own node from both sets.
//! 5. Rotate every non-critical node.
//! 6. After a settle delay, wait for new ready nodes if pods are Pending.
//! 7. Rotate every critical node that is not one of those new nodes.
//! 8. Optionally rotate the job's own node last.
//!
//! Nodes are rotated strictly one at a time, so at most one redundancy point
//! is ever being removed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cluster::ClusterApi;
use crate::config::RotatorConfig;
use crate::drain::Drainer;
use crate::error::RotationError;
use crate::events::{messages, EventEmitter, EventType};
use crate::inventory::{locate_self_node, NodeClassification, NodeInventory};
use crate::readiness::ReadinessWaiter;
use crate::rotator::{NodeRotator, RotationReport, RotationState};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every planned node was processed.
    Completed,
    /// No managed node was old enough.
    NothingEligible,
    /// `LAST_RUN` passed before the plan finished.
    CutoffReached,
}

/// Outcome for one processed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The state machine finished; see the report's terminal state.
    Rotated(RotationReport),
    /// Rotation was aborted by an error.
    Failed { node: String, error: String },
}

impl NodeOutcome {
    pub fn node(&self) -> &str {
        match self {
            Self::Rotated(report) => &report.node,
            Self::Failed { node, .. } => node,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Rotated(r) if r.state == RotationState::Drained)
    }
}

/// Everything a run decided and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub self_node: Option<String>,
    /// Classification after the self node was excluded
    pub classification: NodeClassification,
    /// Whether Pending pods triggered the readiness wait
    pub waited_for_nodes: bool,
    pub new_nodes: Vec<String>,
    pub skipped_new_nodes: Vec<String>,
    /// Processed nodes, in processing order
    pub nodes: Vec<NodeOutcome>,
}

impl RunSummary {
    fn new(outcome: RunOutcome, self_node: Option<String>) -> Self {
        Self {
            outcome,
            self_node,
            classification: NodeClassification::default(),
            waited_for_nodes: false,
            new_nodes: Vec::new(),
            skipped_new_nodes: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Nodes whose rotation did not end drained.
    pub fn failures(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes.iter().filter(|n| !n.is_drained())
    }
}

/// Composes inventory, rotator and readiness waiter into one run.
pub struct RotationPlanner {
    cluster: Arc<dyn ClusterApi>,
    inventory: NodeInventory,
    rotator: NodeRotator,
    waiter: ReadinessWaiter,
    events: EventEmitter,
    config: Arc<RotatorConfig>,
    clock: Clock,
}

impl RotationPlanner {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        drainer: Arc<dyn Drainer>,
        config: Arc<RotatorConfig>,
    ) -> Self {
        Self {
            inventory: NodeInventory::new(cluster.clone(), config.managed_node_selector.clone()),
            rotator: NodeRotator::new(cluster.clone(), drainer, config.clone()),
            waiter: ReadinessWaiter::new(cluster.clone(), &config),
            events: EventEmitter::new(cluster.clone(), config.reporting_instance.clone()),
            cluster,
            config,
            clock: Arc::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn cutoff_reached(&self) -> bool {
        let now = (self.clock)().with_timezone(&Local).time();
        let reached = self.config.last_run_passed(now);
        if reached {
            info!(last_run = ?self.config.last_run, "Last run cutoff reached, stopping");
        }
        reached
    }

    /// Execute the full plan.
    ///
    /// Errors are returned only when the plan cannot start (the self node or
    /// the managed nodes cannot be listed). Per-node failures are recorded in
    /// the summary and the run continues.
    pub async fn run(&self) -> Result<RunSummary, RotationError> {
        if self.cutoff_reached() {
            return Ok(RunSummary::new(RunOutcome::CutoffReached, None));
        }

        let pods = self.cluster.list_all_pods().await?;
        let self_node = locate_self_node(&pods, &self.config.self_pod_substring);
        info!(self_node = ?self_node, "Located job node");

        let managed = self.inventory.list_managed_nodes().await?;
        let original: BTreeSet<String> = managed.iter().map(|n| n.name.clone()).collect();

        let classification = self
            .inventory
            .classify(
                &managed,
                self.config.min_node_age_days,
                &self.config.critical_workloads,
                (self.clock)(),
            )
            .await;

        if classification.is_empty() {
            info!(
                min_node_age_days = self.config.min_node_age_days,
                "No nodes old enough to rotate"
            );
            return Ok(RunSummary::new(RunOutcome::NothingEligible, self_node));
        }

        let self_node_eligible = self_node
            .as_deref()
            .is_some_and(|node| classification.contains(node));
        let classification = classification.exclude(self_node.as_deref());
        info!(
            critical = ?classification.critical,
            non_critical = ?classification.non_critical,
            "Classified nodes"
        );

        let mut summary = RunSummary::new(RunOutcome::Completed, self_node.clone());
        summary.classification = classification.clone();

        for node in &classification.non_critical {
            if self.cutoff_reached() {
                summary.outcome = RunOutcome::CutoffReached;
                return Ok(summary);
            }
            summary.nodes.push(self.process_node(node).await);
        }

        sleep(self.config.delay_wait_pending_pods).await;

        if self.has_pending_pods().await {
            summary.waited_for_nodes = true;
            summary.new_nodes = self.waiter.wait_for_new_nodes(&original).await;
            if !summary.new_nodes.is_empty() {
                sleep(self.config.delay_after_ready).await;
            }
        } else {
            info!("No Pending pods found, continuing");
        }

        info!(critical = ?classification.critical, "Processing critical nodes");
        for node in &classification.critical {
            if summary.new_nodes.contains(node) {
                info!(node = %node, "Skipping newly created node");
                summary.skipped_new_nodes.push(node.clone());
                continue;
            }
            if self.cutoff_reached() {
                summary.outcome = RunOutcome::CutoffReached;
                return Ok(summary);
            }
            summary.nodes.push(self.process_node(node).await);
        }

        if let Some(node) = self_node.as_deref() {
            if !self.config.rotate_self_node {
                info!(node = %node, "Leaving job node for a later run");
            } else if !self_node_eligible {
                info!(node = %node, "Job node is not eligible for rotation");
            } else if self.cutoff_reached() {
                summary.outcome = RunOutcome::CutoffReached;
                return Ok(summary);
            } else {
                info!(node = %node, "Processing job node last");
                summary.nodes.push(self.process_node(node).await);
            }
        }

        info!("Node rotation completed");
        Ok(summary)
    }

    async fn has_pending_pods(&self) -> bool {
        match self.cluster.list_pending_pods().await {
            Ok(pods) => {
                for pod in &pods {
                    info!(pod = %pod.id(), "Pending pod");
                }
                if !pods.is_empty() {
                    info!(count = pods.len(), "Found Pending pods, waiting for new nodes");
                }
                !pods.is_empty()
            }
            Err(e) => {
                warn!(error = %e, "Failed to list Pending pods, not waiting for new nodes");
                false
            }
        }
    }

    /// Rotate one node, containing any failure to that node.
    async fn process_node(&self, node: &str) -> NodeOutcome {
        match self.rotator.rotate(node).await {
            Ok(report) => {
                if report.state == RotationState::DrainFailed {
                    warn!(
                        node = %node,
                        remaining = report.remaining_pods.len(),
                        "Drain did not finish in time, moving on"
                    );
                }
                NodeOutcome::Rotated(report)
            }
            Err(e) => {
                error!(node = %node, error = %e, "Error rotating node");
                self.events
                    .node_event(node, messages::DRAIN_EXCEPTION, EventType::Warning)
                    .await;
                NodeOutcome::Failed {
                    node: node.to_string(),
                    error: e.to_string(),
                }
            }
        }
    }
}
