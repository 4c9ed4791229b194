//! Node rotator: a periodic job that retires aging managed nodes one at a time.
//!
//! Each run finds managed nodes older than a threshold, splits them by
//! whether they host critical workloads, and rotates them in order: cordon,
//! evict a replica of any controller that lives entirely on the node, then
//! drain with a time bound. Between the two batches the job waits for
//! replacement capacity when pods are stuck Pending.
//!
//! The cluster is reached only through [`ClusterApi`]; the drain only
//! through [`Drainer`]. [`KubeCluster`] and [`KubectlDrainer`] are the
//! production implementations.

pub mod cluster;
pub mod collision;
pub mod config;
pub mod drain;
pub mod error;
pub mod events;
pub mod inventory;
pub mod model;
pub mod planner;
pub mod readiness;
pub mod rotator;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterApi, KubeCluster};
pub use collision::{Collision, CollisionDetector};
pub use config::{CriticalSelector, RotatorConfig};
pub use drain::{Drainer, KubectlDrainer};
pub use error::{ClusterError, ConfigError, DrainError, RotationError};
pub use events::{EventEmitter, EventType, RotationEvent};
pub use inventory::{NodeClassification, NodeInventory};
pub use model::{ControllerKey, Node, Pod, PodId, PodPhase};
pub use planner::{NodeOutcome, RotationPlanner, RunOutcome, RunSummary};
pub use readiness::ReadinessWaiter;
pub use rotator::{NodeRotator, RotationReport, RotationState};
