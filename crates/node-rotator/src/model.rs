//! Immutable views of the cluster objects the rotator reasons about.
//!
//! The Kubernetes API hands back loosely-typed records (optional metadata,
//! string phases, free-form condition lists). Everything is converted once,
//! at the [`crate::cluster::ClusterApi`] boundary, into the value types below.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Label key to value. Keys are unique and iterate in sorted order.
pub type Labels = BTreeMap<String, String>;

/// Reference from a pod to the controller that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerReference {
    /// Controller kind, e.g. `ReplicaSet` or `StatefulSet`
    pub kind: String,
    /// Controller name
    pub name: String,
}

/// Status condition shared by nodes and pods ("Ready", "ContainersReady", ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Condition {
    /// Condition type, e.g. "Ready"
    pub condition_type: String,
    /// "True", "False" or "Unknown"
    pub status: String,
}

impl Condition {
    fn is_true(&self, condition_type: &str) -> bool {
        self.condition_type == condition_type && self.status == "True"
    }
}

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl PodPhase {
    /// Parse the phase string reported in `status.phase`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(phase)
    }
}

/// A cluster node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub unschedulable: bool,
    pub labels: Labels,
    pub conditions: Vec<Condition>,
}

impl Node {
    /// Whether the node is old enough to be rotated.
    ///
    /// The comparison is deliberately against `days + 1`: a node created
    /// exactly `days + 1` days ago is still too young. Nodes without a
    /// creation timestamp are never eligible.
    pub fn is_older_than(&self, days: u32, now: DateTime<Utc>) -> bool {
        self.created_at
            .is_some_and(|created| now - created > Duration::days(i64::from(days) + 1))
    }

    /// Whether the node reports a `Ready` condition of "True".
    pub fn is_ready(&self) -> bool {
        self.conditions.iter().any(|c| c.is_true("Ready"))
    }
}

/// Namespace-qualified pod identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A pod, as seen at the moment it was listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Node the pod is scheduled on, if any
    pub node_name: Option<String>,
    /// Owners in the order the API reports them
    pub owner_references: Vec<OwnerReference>,
    pub labels: Labels,
    pub phase: PodPhase,
    pub conditions: Vec<Condition>,
}

impl Pod {
    pub fn id(&self) -> PodId {
        PodId {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// True if any owner reference names `controller`, regardless of kind.
    pub fn is_owned_by(&self, controller: &str) -> bool {
        self.owner_references.iter().any(|o| o.name == controller)
    }

    pub fn is_pending(&self) -> bool {
        self.phase == PodPhase::Pending
    }

    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }
}

/// Identity of the controller owning a group of pods.
///
/// Derived per check from a pod's owner reference and namespace; never
/// persisted. Ordering is (kind, name, namespace).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ControllerKey {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ControllerKey {
    pub fn new(owner: &OwnerReference, namespace: &str) -> Self {
        Self {
            kind: owner.kind.clone(),
            name: owner.name.clone(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for ControllerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
