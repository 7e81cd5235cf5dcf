//! Pod model
//!
//! A trimmed view of the cluster pod schema carrying exactly the fields the
//! eviction pipeline reads: requests, phase, start time, last termination
//! state, ownership and the observed-containers annotation left by the
//! admission webhook.

use super::quantity::ResourceList;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Annotation written by the admission webhook enumerating the containers it
/// acted upon at pod creation. Comma-separated container names.
pub const VPA_OBSERVED_CONTAINERS_ANNOTATION: &str = "vpaObservedContainers";

/// Termination reason reported for out-of-memory kills.
pub const OOM_KILLED_REASON: &str = "OOMKilled";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodSpec {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    pub name: String,
    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRequirements {
    pub requests: ResourceList,
    pub limits: ResourceList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodStatus {
    pub phase: PodPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerStatus {
    pub name: String,
    pub last_state: ContainerState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerStateTerminated {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Namespace-qualified pod identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Pod {
    pub fn id(&self) -> PodId {
        PodId {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_running(&self) -> bool {
        self.status.phase == PodPhase::Running
    }

    pub fn is_pending(&self) -> bool {
        self.status.phase == PodPhase::Pending
    }

    /// Pods already being deleted are dropped before classification.
    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Parse the observed-containers annotation.
    ///
    /// Returns `None` when the annotation is absent or malformed; a
    /// malformed value must not accidentally opt every container out, so
    /// it is treated exactly like a missing annotation. An explicitly empty
    /// value yields an empty set: the webhook saw the pod and acted on
    /// nothing.
    pub fn observed_containers(&self) -> Option<BTreeSet<String>> {
        let raw = self
            .metadata
            .annotations
            .get(VPA_OBSERVED_CONTAINERS_ANNOTATION)?;
        if raw.trim().is_empty() {
            return Some(BTreeSet::new());
        }
        let mut set = BTreeSet::new();
        for part in raw.split(',') {
            let name = part.trim();
            if !is_dns1123_label(name) {
                return None;
            }
            set.insert(name.to_string());
        }
        Some(set)
    }
}

/// RFC 1123 label check used to validate annotation contents.
fn is_dns1123_label(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let bytes = s.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Label selector with both exact-match labels and set expressions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectorOperator {
    #[default]
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelector {
    /// Selector over exact labels only.
    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: labels,
            match_expressions: Vec::new(),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        for req in &self.match_expressions {
            let actual = labels.get(&req.key);
            let ok = match req.operator {
                SelectorOperator::In => actual.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::NotIn => !actual.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::Exists => actual.is_some(),
                SelectorOperator::DoesNotExist => actual.is_none(),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_with_annotation(value: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = "pod-1".into();
        pod.metadata.namespace = "default".into();
        if let Some(v) = value {
            pod.metadata
                .annotations
                .insert(VPA_OBSERVED_CONTAINERS_ANNOTATION.into(), v.into());
        }
        pod
    }

    #[test]
    fn observed_containers_absent() {
        assert_eq!(pod_with_annotation(None).observed_containers(), None);
    }

    #[test]
    fn observed_containers_empty_is_empty_set() {
        let set = pod_with_annotation(Some("")).observed_containers().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn observed_containers_parses_list() {
        let set = pod_with_annotation(Some("app, sidecar"))
            .observed_containers()
            .unwrap();
        assert!(set.contains("app"));
        assert!(set.contains("sidecar"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn observed_containers_malformed_treated_as_absent() {
        assert_eq!(
            pod_with_annotation(Some("abcd;';")).observed_containers(),
            None
        );
        assert_eq!(
            pod_with_annotation(Some("UPPER")).observed_containers(),
            None
        );
    }

    #[test]
    fn selector_matches_labels_and_expressions() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        labels.insert("tier".to_string(), "frontend".to_string());

        let mut selector = LabelSelector::from_labels(
            [("app".to_string(), "web".to_string())].into_iter().collect(),
        );
        assert!(selector.matches(&labels));

        selector.match_expressions.push(LabelSelectorRequirement {
            key: "tier".into(),
            operator: SelectorOperator::In,
            values: vec!["frontend".into(), "edge".into()],
        });
        assert!(selector.matches(&labels));

        selector.match_expressions.push(LabelSelectorRequirement {
            key: "legacy".into(),
            operator: SelectorOperator::DoesNotExist,
            values: vec![],
        });
        assert!(selector.matches(&labels));

        selector.match_labels.insert("app".into(), "batch".into());
        assert!(!selector.matches(&labels));
    }

    #[test]
    fn pod_deserializes_from_wire_shape() {
        let raw = serde_json::json!({
            "metadata": {
                "name": "web-0",
                "namespace": "prod",
                "labels": {"app": "web"},
                "ownerReferences": [
                    {"apiVersion": "apps/v1", "kind": "StatefulSet", "name": "web", "controller": true}
                ]
            },
            "spec": {
                "containers": [
                    {"name": "app", "resources": {"requests": {"cpu": "250m", "memory": "64Mi"}}}
                ]
            },
            "status": {
                "phase": "Running",
                "startTime": "2024-03-01T10:00:00Z"
            }
        });
        let pod: Pod = serde_json::from_value(raw).unwrap();
        assert_eq!(pod.name(), "web-0");
        assert!(pod.is_running());
        assert_eq!(pod.spec.containers[0].name, "app");
        assert_eq!(
            pod.spec.containers[0]
                .resources
                .requests
                .get(&crate::models::ResourceName::Cpu)
                .unwrap()
                .milli_value(),
            250
        );
        assert_eq!(pod.metadata.owner_references[0].kind, "StatefulSet");
    }
}
