//! [`ClusterApi`] backed by the Kubernetes API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Event as K8sEvent, EventSource, Node as K8sNode, ObjectReference, Pod as K8sPod,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Error as KubeError};
use serde_json::json;
use tracing::debug;

use super::{label_selector, ClusterApi};
use crate::error::ClusterError;
use crate::events::RotationEvent;
use crate::model::{Condition, Labels, Node, OwnerReference, Pod, PodPhase};

/// Production cluster access through a `kube` client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<K8sPod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let pods = api.list(params).await?;
        Ok(pods.items.into_iter().map(Pod::from).collect())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let api: Api<K8sNode> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let nodes = api.list(&params).await?;
        Ok(nodes.items.into_iter().map(Node::from).collect())
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().fields(&format!("spec.nodeName={node}"));
        self.list_pods(None, &params).await
    }

    async fn list_pods_matching(
        &self,
        namespace: &str,
        selector: &Labels,
    ) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().labels(&label_selector(selector));
        self.list_pods(Some(namespace), &params).await
    }

    async fn list_pods_in_namespace(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        self.list_pods(Some(namespace), &ListParams::default()).await
    }

    async fn list_all_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        self.list_pods(None, &ListParams::default()).await
    }

    async fn list_pending_pods(&self) -> Result<Vec<Pod>, ClusterError> {
        let params = ListParams::default().fields("status.phase=Pending");
        self.list_pods(None, &params).await
    }

    async fn cordon_node(&self, node: &str) -> Result<(), ClusterError> {
        let api: Api<K8sNode> = Api::all(self.client.clone());
        let patch = json!({ "spec": { "unschedulable": true } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<K8sPod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(err)) if err.code == 404 => Err(ClusterError::NotFound {
                kind: "Pod",
                name: format!("{namespace}/{name}"),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_event(&self, event: &RotationEvent) -> Result<(), ClusterError> {
        let api: Api<K8sEvent> =
            Api::namespaced(self.client.clone(), &event.involved.namespace);
        let created = api
            .create(&PostParams::default(), &to_k8s_event(event))
            .await?;
        debug!(
            event = ?created.metadata.name,
            message = %event.message,
            "Event created"
        );
        Ok(())
    }
}

fn to_k8s_event(event: &RotationEvent) -> K8sEvent {
    K8sEvent {
        metadata: ObjectMeta {
            name: Some(event.name.clone()),
            namespace: Some(event.involved.namespace.clone()),
            ..ObjectMeta::default()
        },
        involved_object: ObjectReference {
            kind: Some(event.involved.kind.clone()),
            name: Some(event.involved.name.clone()),
            namespace: Some(event.involved.namespace.clone()),
            ..ObjectReference::default()
        },
        reason: Some(event.reason.clone()),
        message: Some(event.message.clone()),
        type_: Some(event.event_type.as_str().to_string()),
        source: Some(EventSource {
            component: Some(event.component.clone()),
            host: Some(event.instance.clone()),
        }),
        event_time: Some(MicroTime(event.timestamp)),
        first_timestamp: Some(Time(event.timestamp)),
        last_timestamp: Some(Time(event.timestamp)),
        reporting_component: Some(event.component.clone()),
        reporting_instance: Some(event.instance.clone()),
        action: Some(event.action.clone()),
        ..K8sEvent::default()
    }
}

impl From<K8sNode> for Node {
    fn from(node: K8sNode) -> Self {
        let conditions = node
            .status
            .and_then(|status| status.conditions)
            .unwrap_or_default()
            .into_iter()
            .map(|c| Condition {
                condition_type: c.type_,
                status: c.status,
            })
            .collect();

        Self {
            name: node.metadata.name.unwrap_or_default(),
            created_at: node.metadata.creation_timestamp.map(|t| t.0),
            unschedulable: node
                .spec
                .and_then(|spec| spec.unschedulable)
                .unwrap_or(false),
            labels: node.metadata.labels.unwrap_or_default(),
            conditions,
        }
    }
}

impl From<K8sPod> for Pod {
    fn from(pod: K8sPod) -> Self {
        let (phase, conditions) = match pod.status {
            Some(status) => (
                status.phase.as_deref().map_or(PodPhase::Unknown, PodPhase::parse),
                status
                    .conditions
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| Condition {
                        condition_type: c.type_,
                        status: c.status,
                    })
                    .collect(),
            ),
            None => (PodPhase::Unknown, Vec::new()),
        };

        Self {
            name: pod.metadata.name.unwrap_or_default(),
            namespace: pod.metadata.namespace.unwrap_or_default(),
            node_name: pod.spec.and_then(|spec| spec.node_name),
            owner_references: pod
                .metadata
                .owner_references
                .unwrap_or_default()
                .into_iter()
                .map(|o| OwnerReference {
                    kind: o.kind,
                    name: o.name,
                })
                .collect(),
            labels: pod.metadata.labels.unwrap_or_default(),
            phase,
            conditions,
        }
    }
}
