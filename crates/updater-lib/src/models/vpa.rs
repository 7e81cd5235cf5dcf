//! Vertical autoscaler object model
//!
//! The updater holds these objects read-only: an external recommender writes
//! `status.recommendation`, and the update/resource policies scope what the
//! updater may touch.

use super::pod::ObjectMeta;
use super::quantity::ResourceList;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container policy entry name that applies to all containers without an
/// explicit entry.
pub const WILDCARD_CONTAINER_NAME: &str = "*";

/// Condition set by the recommender when it cannot act on the object's
/// configuration. The updater only consults it to skip.
pub const CONDITION_CONFIG_UNSUPPORTED: &str = "ConfigUnsupported";
pub const CONDITION_CONFIG_DEPRECATED: &str = "ConfigDeprecated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    Off,
    Initial,
    Recreate,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerScalingMode {
    #[default]
    Auto,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContainerControlledValues {
    #[default]
    RequestsAndLimits,
    RequestsOnly,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodUpdatePolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<UpdateMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerResourcePolicy {
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ContainerScalingMode>,
    pub min_allowed: ResourceList,
    pub max_allowed: ResourceList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controlled_values: Option<ContainerControlledValues>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodResourcePolicy {
    pub container_policies: Vec<ContainerResourcePolicy>,
}

impl PodResourcePolicy {
    /// The policy entry governing a container: an explicit entry wins over
    /// the wildcard entry.
    pub fn policy_for(&self, container: &str) -> Option<&ContainerResourcePolicy> {
        self.container_policies
            .iter()
            .find(|p| p.container_name == container)
            .or_else(|| {
                self.container_policies
                    .iter()
                    .find(|p| p.container_name == WILDCARD_CONTAINER_NAME)
            })
    }
}

/// Effective scaling mode for a container under an optional policy.
///
/// Explicit entry beats wildcard; containers with neither default to Auto.
pub fn effective_scaling_mode(
    policy: Option<&PodResourcePolicy>,
    container: &str,
) -> ContainerScalingMode {
    policy
        .and_then(|p| p.policy_for(container))
        .and_then(|p| p.mode)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendedContainerResources {
    pub container_name: String,
    pub target: ResourceList,
    pub lower_bound: ResourceList,
    pub upper_bound: ResourceList,
    pub uncapped_target: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecommendedPodResources {
    pub container_recommendations: Vec<RecommendedContainerResources>,
}

impl RecommendedPodResources {
    pub fn for_container(&self, container: &str) -> Option<&RecommendedContainerResources> {
        self.container_recommendations
            .iter()
            .find(|r| r.container_name == container)
    }

    pub fn is_empty(&self) -> bool {
        self.container_recommendations.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpaCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Reference to the controller whose pods the autoscaler governs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpaSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<PodUpdatePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<PodResourcePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VpaStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendedPodResources>,
    pub conditions: Vec<VpaCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerticalPodAutoscaler {
    pub metadata: ObjectMeta,
    pub spec: VpaSpec,
    pub status: VpaStatus,
}

/// Namespace-qualified autoscaler identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VpaId {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for VpaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl VerticalPodAutoscaler {
    pub fn id(&self) -> VpaId {
        VpaId {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    /// Update mode with the API default applied: an absent policy or mode
    /// means Auto.
    pub fn update_mode(&self) -> UpdateMode {
        self.spec
            .update_policy
            .as_ref()
            .and_then(|p| p.update_mode)
            .unwrap_or_default()
    }

    /// Whether this object's mode produces evictions at all.
    pub fn produces_evictions(&self) -> bool {
        matches!(self.update_mode(), UpdateMode::Recreate | UpdateMode::Auto)
    }

    pub fn has_condition_true(&self, condition_type: &str) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type == condition_type && c.status == "True")
    }

    pub fn resource_policy(&self) -> Option<&PodResourcePolicy> {
        self.spec.resource_policy.as_ref()
    }
}
