//! Data model for the eviction pipeline
//!
//! Trimmed serde views of the cluster objects the updater reads, plus the
//! exact-precision quantity type every resource comparison goes through.

mod pod;
mod quantity;
mod vpa;

pub use pod::{
    Container, ContainerState, ContainerStateTerminated, ContainerStatus, LabelSelector,
    LabelSelectorRequirement, ObjectMeta, OwnerReference, Pod, PodId, PodPhase, PodSpec, PodStatus,
    ResourceRequirements, SelectorOperator, OOM_KILLED_REASON, VPA_OBSERVED_CONTAINERS_ANNOTATION,
};
pub use quantity::{resources, Quantity, ResourceList, ResourceName};
pub use vpa::{
    effective_scaling_mode, ContainerControlledValues, ContainerResourcePolicy,
    ContainerScalingMode, PodResourcePolicy, PodUpdatePolicy, RecommendedContainerResources,
    RecommendedPodResources, TargetRef, UpdateMode, VerticalPodAutoscaler, VpaCondition, VpaId,
    VpaSpec, VpaStatus, CONDITION_CONFIG_DEPRECATED, CONDITION_CONFIG_UNSUPPORTED,
    WILDCARD_CONTAINER_NAME,
};
