//! In-memory cluster and drain doubles for unit tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::cluster::ClusterApi;
use crate::config::{RotatorConfig, DEFAULT_MANAGED_NODE_SELECTOR};
use crate::drain::Drainer;
use crate::error::{ClusterError, DrainError};
use crate::events::RotationEvent;
use crate::model::{Condition, Labels, Node, OwnerReference, Pod, PodPhase};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

/// Config with every wait shortened to zero.
pub fn test_config() -> RotatorConfig {
    RotatorConfig {
        delay_after_ready: Duration::ZERO,
        startup_sleep: Duration::ZERO,
        delay_wait_pending_pods: Duration::ZERO,
        node_drain_timeout: Duration::from_secs(30),
        total_wait_cycles: 3,
        pending_poll_interval: Duration::ZERO,
        eviction_settle: Duration::ZERO,
        readiness_poll_interval: Duration::ZERO,
        ..RotatorConfig::default()
    }
}

fn ready_condition() -> Condition {
    Condition {
        condition_type: "Ready".to_string(),
        status: "True".to_string(),
    }
}

/// A Ready node carrying the managed-by label, created `age_days` before `now`.
pub fn managed_node(name: &str, age_days: i64, now: DateTime<Utc>) -> Node {
    let (key, value) = DEFAULT_MANAGED_NODE_SELECTOR
        .split_once('=')
        .unwrap();
    Node {
        name: name.to_string(),
        created_at: Some(now - chrono::Duration::days(age_days)),
        unschedulable: false,
        labels: [(key.to_string(), value.to_string())].into_iter().collect(),
        conditions: vec![ready_condition()],
    }
}

/// A freshly created, Ready node without the managed-by label.
pub fn ready_node(name: &str, now: DateTime<Utc>) -> Node {
    Node {
        name: name.to_string(),
        created_at: Some(now),
        unschedulable: false,
        labels: Labels::new(),
        conditions: vec![ready_condition()],
    }
}

/// A Running pod without owners or labels.
pub fn pod(namespace: &str, name: &str, node: &str) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: Some(node.to_string()),
        owner_references: Vec::new(),
        labels: Labels::new(),
        phase: PodPhase::Running,
        conditions: vec![ready_condition()],
    }
}

/// A Running pod owned by ReplicaSet `controller`, labelled `app=<app>`.
pub fn replica(namespace: &str, name: &str, node: &str, controller: &str, app: &str) -> Pod {
    let mut pod = pod(namespace, name, node);
    pod.owner_references.push(OwnerReference {
        kind: "ReplicaSet".to_string(),
        name: controller.to_string(),
    });
    pod.labels.insert("app".to_string(), app.to_string());
    pod
}

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    pods: Vec<Pod>,
    cordoned: Vec<String>,
    deleted: Vec<String>,
    delete_attempts: usize,
    events: Vec<RotationEvent>,
    unfiltered_node_lists: usize,
    namespace_polls: usize,
    // Evicted replicas reappear Pending on this node
    reschedule_to: Option<String>,
    pending_polls_per_eviction: usize,
    pending_polls: usize,
    vanishing: BTreeSet<String>,
    stuck_pending: BTreeSet<String>,
    failing_namespace_lists: usize,
    failing_cordons: BTreeSet<String>,
    failing_pod_lists: BTreeSet<String>,
    failing_deletes: usize,
    fail_events: bool,
    fail_node_listing: bool,
}

/// Cluster held in memory.
///
/// Evicting a pod can reschedule a replacement onto another node in the
/// Pending phase; the replacement turns Running after a configured number of
/// namespace polls.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        Self {
            state: Mutex::new(State {
                nodes,
                pods,
                ..State::default()
            }),
        }
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    /// Replacements of evicted pods appear on `node`, Pending for `polls`
    /// namespace polls.
    pub fn reschedule_evicted_to(self, node: &str, polls: usize) -> Self {
        let node = node.to_string();
        self.with(|s| {
            s.reschedule_to = Some(node);
            s.pending_polls_per_eviction = polls;
        })
    }

    /// Deleting `pod` finds it already gone.
    pub fn vanish_before_delete(self, pod: &str) -> Self {
        let pod = pod.to_string();
        self.with(|s| {
            s.vanishing.insert(pod);
        })
    }

    /// `pod` stays Pending no matter how often its namespace is polled.
    pub fn stay_pending(self, pod: &str) -> Self {
        let pod = pod.to_string();
        self.with(|s| {
            s.stuck_pending.insert(pod);
        })
    }

    /// The next `count` namespace listings fail. Failed listings still count
    /// as polls.
    pub fn fail_namespace_lists(self, count: usize) -> Self {
        self.with(|s| s.failing_namespace_lists = count)
    }

    pub fn fail_cordon(self, node: &str) -> Self {
        let node = node.to_string();
        self.with(|s| {
            s.failing_cordons.insert(node);
        })
    }

    pub fn fail_pod_listing_on(self, node: &str) -> Self {
        let node = node.to_string();
        self.with(|s| {
            s.failing_pod_lists.insert(node);
        })
    }

    pub fn fail_deletes(self, count: usize) -> Self {
        self.with(|s| s.failing_deletes = count)
    }

    pub fn fail_events(self) -> Self {
        self.with(|s| s.fail_events = true)
    }

    pub fn fail_node_listing(self) -> Self {
        self.with(|s| s.fail_node_listing = true)
    }

    pub fn cordoned(&self) -> Vec<String> {
        self.state.lock().unwrap().cordoned.clone()
    }

    /// Deleted pods as `namespace/name`.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    pub fn namespace_polls(&self) -> usize {
        self.state.lock().unwrap().namespace_polls
    }

    /// Node listings made without a label selector.
    pub fn unfiltered_node_lists(&self) -> usize {
        self.state.lock().unwrap().unfiltered_node_lists
    }

    pub fn event_messages(&self, node: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.involved.name == node)
            .map(|e| e.message.clone())
            .collect()
    }
}

fn unavailable() -> ClusterError {
    ClusterError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_node_listing {
            return Err(unavailable());
        }
        let Some(selector) = label_selector else {
            state.unfiltered_node_lists += 1;
            return Ok(state.nodes.clone());
        };
        let (key, value) = selector.split_once('=').unwrap_or((selector, ""));
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.labels.get(key).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.failing_pod_lists.contains(node) {
            return Err(unavailable());
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.node_name.as_deref() == Some(node))
            .cloned()
            .collect())
    }

    async fn list_pods_matching(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| selector.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }

    async fn list_pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.namespace_polls += 1;
        if state.failing_namespace_lists > 0 {
            state.failing_namespace_lists -= 1;
            return Err(unavailable());
        }
        if state.pending_polls == 0 {
            let State {
                pods, stuck_pending, ..
            } = &mut *state;
            for pod in pods.iter_mut().filter(|p| p.namespace == namespace) {
                if pod.phase == PodPhase::Pending && !stuck_pending.contains(&pod.name) {
                    pod.phase = PodPhase::Running;
                }
            }
        } else {
            state.pending_polls -= 1;
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        Ok(self.state.lock().unwrap().pods.clone())
    }

    async fn list_pending_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state.pods.iter().filter(|p| p.is_pending()).cloned().collect())
    }

    async fn cordon_node(&self, node: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_cordons.contains(node) {
            return Err(unavailable());
        }
        for n in state.nodes.iter_mut().filter(|n| n.name == node) {
            n.unschedulable = true;
        }
        state.cordoned.push(node.to_string());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts += 1;
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(unavailable());
        }

        let Some(index) = state
            .pods
            .iter()
            .position(|p| p.namespace == namespace && p.name == name)
        else {
            return Err(ClusterError::NotFound {
                kind: "Pod",
                name: format!("{namespace}/{name}"),
            });
        };

        let evicted = state.pods.remove(index);
        if let Some(node) = state.reschedule_to.clone() {
            let mut replacement = evicted.clone();
            replacement.name = format!("{}-replacement", evicted.name);
            replacement.node_name = Some(node);
            replacement.phase = PodPhase::Pending;
            state.pods.push(replacement);
            state.pending_polls = state.pending_polls_per_eviction;
        }

        if state.vanishing.contains(name) {
            return Err(ClusterError::NotFound {
                kind: "Pod",
                name: format!("{namespace}/{name}"),
            });
        }
        state.deleted.push(format!("{namespace}/{name}"));
        Ok(())
    }

    async fn create_event(&self, event: &RotationEvent) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_events {
            return Err(unavailable());
        }
        state.events.push(event.clone());
        Ok(())
    }
}

/// Scripted drain result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeDrain {
    Complete,
    TimeOut,
    Fail,
}

/// Drainer that records calls and replays scripted results per node.
/// Unscripted drains complete.
#[derive(Default)]
pub struct FakeDrainer {
    scripts: Mutex<HashMap<String, VecDeque<FakeDrain>>>,
    drained: Mutex<Vec<(String, Duration)>>,
}

impl FakeDrainer {
    pub fn script(self, node: &str, result: FakeDrain) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn drained(&self) -> Vec<(String, Duration)> {
        self.drained.lock().unwrap().clone()
    }

    pub fn drained_nodes(&self) -> Vec<String> {
        self.drained().into_iter().map(|(node, _)| node).collect()
    }
}

#[async_trait]
impl Drainer for FakeDrainer {
    async fn drain(&self, node: &str, timeout: Duration) -> Result<(), DrainError> {
        self.drained
            .lock()
            .unwrap()
            .push((node.to_string(), timeout));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(VecDeque::pop_front)
            .unwrap_or(FakeDrain::Complete);

        match next {
            FakeDrain::Complete => Ok(()),
            FakeDrain::TimeOut => Err(DrainError::TimedOut {
                node: node.to_string(),
                timeout,
            }),
            FakeDrain::Fail => Err(DrainError::Failed {
                node: node.to_string(),
                code: Some(1),
                stderr: "error: cannot evict pod".to_string(),
            }),
        }
    }
}
