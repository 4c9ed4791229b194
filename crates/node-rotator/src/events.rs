//! Node lifecycle events.
//!
//! Events are **fire-and-forget**: a failed event is logged as a warning and
//! never interrupts rotation. There is no retry and no acknowledgement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cluster::ClusterApi;

/// Reason attached to every rotation event.
pub const REASON: &str = "NodeRotation";

/// Component reported as the event source.
pub const COMPONENT: &str = "node-rotator";

/// Action reported on rotation events.
pub const ACTION: &str = "Update";

/// Namespace node events are recorded in.
pub const NODE_EVENT_NAMESPACE: &str = "default";

/// Well-known event messages, in lifecycle order.
pub mod messages {
    pub const CORDON_INIT: &str = "Node cordon init";
    pub const DRAIN_START: &str = "Node drain start";
    pub const DRAIN_COMPLETED: &str = "Node drain completed";
    pub const DRAIN_EXCEPTION: &str = "Node drain exception caught";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Warning => "Warning",
        }
    }
}

/// Object an event is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvolvedObject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

/// A lifecycle record appended to the cluster event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationEvent {
    /// Unique event object name
    pub name: String,
    pub involved: InvolvedObject,
    pub reason: String,
    pub message: String,
    pub event_type: EventType,
    pub action: String,
    pub component: String,
    /// Host reporting the event
    pub instance: String,
    pub timestamp: DateTime<Utc>,
}

impl RotationEvent {
    /// Build an event about `node`.
    pub fn for_node(node: &str, message: &str, event_type: EventType, instance: &str) -> Self {
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            involved: InvolvedObject {
                kind: "Node".to_string(),
                name: node.to_string(),
                namespace: NODE_EVENT_NAMESPACE.to_string(),
            },
            reason: REASON.to_string(),
            message: message.to_string(),
            event_type,
            action: ACTION.to_string(),
            component: COMPONENT.to_string(),
            instance: instance.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Emits rotation events, swallowing failures.
#[derive(Clone)]
pub struct EventEmitter {
    cluster: Arc<dyn ClusterApi>,
    instance: String,
}

impl EventEmitter {
    pub fn new(cluster: Arc<dyn ClusterApi>, instance: impl Into<String>) -> Self {
        Self {
            cluster,
            instance: instance.into(),
        }
    }

    pub async fn node_event(&self, node: &str, message: &str, event_type: EventType) {
        let event = RotationEvent::for_node(node, message, event_type, &self.instance);
        if let Err(e) = self.cluster.create_event(&event).await {
            warn!(
                node = %node,
                message,
                error = %e,
                "Failed to publish node event"
            );
        }
    }
}
