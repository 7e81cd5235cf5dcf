//! Target and workload resolution
//!
//! Two lookups delegated to the cluster: the label selector behind an
//! autoscaler's targetRef, and the topmost well-known controller owning a
//! pod. A fetch failure makes the autoscaler unsupported for the tick; it
//! never poisons other autoscalers.

use super::http::HttpClusterGateway;
use crate::eviction::WorkloadKey;
use crate::models::{LabelSelector, Pod, TargetRef, VerticalPodAutoscaler};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Resolves an autoscaler's targetRef to the label selector of its
/// controller.
#[async_trait]
pub trait TargetSelectorFetcher: Send + Sync {
    async fn fetch_selector(&self, vpa: &VerticalPodAutoscaler) -> Result<LabelSelector>;
}

/// Resolves a pod to the topmost well-known controller managing it.
#[async_trait]
pub trait ControllerFetcher: Send + Sync {
    async fn topmost_workload(&self, pod: &Pod) -> Result<Option<WorkloadKey>>;
}

/// API path prefix and collection name for the controller kinds the updater
/// understands.
fn controller_collection(kind: &str) -> Option<(&'static str, &'static str)> {
    match kind {
        "Deployment" => Some(("/apis/apps/v1", "deployments")),
        "StatefulSet" => Some(("/apis/apps/v1", "statefulsets")),
        "DaemonSet" => Some(("/apis/apps/v1", "daemonsets")),
        "ReplicaSet" => Some(("/apis/apps/v1", "replicasets")),
        "Job" => Some(("/apis/batch/v1", "jobs")),
        "CronJob" => Some(("/apis/batch/v1", "cronjobs")),
        "ReplicationController" => Some(("/api/v1", "replicationcontrollers")),
        _ => None,
    }
}

fn object_path(kind: &str, namespace: &str, name: &str) -> Option<String> {
    let (prefix, plural) = controller_collection(kind)?;
    Some(format!("{prefix}/namespaces/{namespace}/{plural}/{name}"))
}

/// Controller object trimmed to ownership and selector.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ControllerObject {
    metadata: ControllerMeta,
    spec: ControllerSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ControllerMeta {
    owner_references: Vec<crate::models::OwnerReference>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ControllerSpec {
    #[serde(deserialize_with = "selector_or_labels", default)]
    selector: Option<LabelSelector>,
}

/// ReplicationControllers carry a bare label map where everything else has a
/// structured selector; accept both.
fn selector_or_labels<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<LabelSelector>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    let Some(value) = raw else {
        return Ok(None);
    };
    let structured = value
        .as_object()
        .is_some_and(|o| o.is_empty() || o.contains_key("matchLabels") || o.contains_key("matchExpressions"));
    if structured {
        serde_json::from_value::<LabelSelector>(value)
            .map(Some)
            .map_err(D::Error::custom)
    } else {
        serde_json::from_value::<BTreeMap<String, String>>(value)
            .map(|labels| Some(LabelSelector::from_labels(labels)))
            .map_err(D::Error::custom)
    }
}

#[async_trait]
impl TargetSelectorFetcher for HttpClusterGateway {
    async fn fetch_selector(&self, vpa: &VerticalPodAutoscaler) -> Result<LabelSelector> {
        let Some(TargetRef { kind, name, .. }) = vpa.spec.target_ref.as_ref() else {
            bail!("autoscaler {} has no targetRef", vpa.id());
        };
        let namespace = &vpa.metadata.namespace;
        let path = object_path(kind, namespace, name)
            .ok_or_else(|| anyhow!("unsupported targetRef kind {kind}"))?;
        let object: ControllerObject = self
            .get_json(&path)
            .await?
            .ok_or_else(|| anyhow!("target {kind} {namespace}/{name} not found"))?;
        object
            .spec
            .selector
            .ok_or_else(|| anyhow!("target {kind} {namespace}/{name} has no selector"))
    }
}

#[async_trait]
impl ControllerFetcher for HttpClusterGateway {
    async fn topmost_workload(&self, pod: &Pod) -> Result<Option<WorkloadKey>> {
        let Some(owner) = pod
            .metadata
            .owner_references
            .iter()
            .find(|r| r.controller.unwrap_or(false))
        else {
            return Ok(None);
        };
        if controller_collection(&owner.kind).is_none() {
            return Ok(None);
        }

        let namespace = pod.metadata.namespace.clone();
        let mut kind = owner.kind.clone();
        let mut name = owner.name.clone();

        // ReplicaSets and Jobs are usually one hop below the controller a
        // human would name; walk up once when the parent is well known.
        let parent_kind = match kind.as_str() {
            "ReplicaSet" => Some("Deployment"),
            "Job" => Some("CronJob"),
            _ => None,
        };
        if let Some(parent_kind) = parent_kind {
            if let Some(path) = object_path(&kind, &namespace, &name) {
                if let Some(object) = self.get_json::<ControllerObject>(&path).await? {
                    if let Some(parent) = object
                        .metadata
                        .owner_references
                        .iter()
                        .find(|r| r.controller.unwrap_or(false) && r.kind == parent_kind)
                    {
                        kind = parent.kind.clone();
                        name = parent.name.clone();
                    }
                }
            }
        }

        Ok(Some(WorkloadKey {
            namespace,
            kind,
            name,
        }))
    }
}
