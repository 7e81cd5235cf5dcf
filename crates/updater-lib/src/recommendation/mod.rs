//! Recommendation post-processing
//!
//! Raw recommender output cannot drive evictions directly: per-container
//! policy and namespace LimitRange bounds cap it first, and containers whose
//! scaling mode is Off are removed entirely. Downstream components treat a
//! missing container entry as "no opinion".

mod limit_range;

pub use limit_range::{
    LimitRange, LimitRangeBounds, LimitRangeCalculator, LimitRangeItem, LimitRangeSnapshot,
    LimitRangeSpec, NoopLimitsCalculator, LIMIT_TYPE_CONTAINER,
};

use crate::models::{
    effective_scaling_mode, ContainerScalingMode, Pod, PodResourcePolicy, Quantity,
    RecommendedContainerResources, RecommendedPodResources, ResourceList, ResourceName,
    VpaCondition,
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-container notes about which recommendation fields were capped. Used
/// for diagnostic surfaces only, never for decisions.
pub type ContainerToAnnotationsMap = BTreeMap<String, Vec<String>>;

/// Adjusts a recommendation to policy and environment context before it is
/// allowed anywhere near an eviction decision.
pub trait RecommendationProcessor: Send + Sync {
    /// Returns the processed recommendation and capping annotations. Always
    /// returns a recommendation (possibly empty), or an error only when the
    /// LimitRange calculator itself is failing.
    fn apply(
        &self,
        recommendation: Option<&RecommendedPodResources>,
        policy: Option<&PodResourcePolicy>,
        conditions: &[VpaCondition],
        pod: &Pod,
    ) -> Result<(RecommendedPodResources, ContainerToAnnotationsMap)>;
}

/// Processor that clamps each container's target and bounds into
/// `[minAllowed, maxAllowed]` and then into the namespace's container
/// LimitRange, independently per resource dimension.
pub struct CappingProcessor {
    limits: Arc<dyn LimitRangeCalculator>,
}

impl CappingProcessor {
    pub fn new(limits: Arc<dyn LimitRangeCalculator>) -> Self {
        Self { limits }
    }

    /// Processor that only applies container policy, no LimitRange bounds.
    pub fn without_limit_ranges() -> Self {
        Self::new(Arc::new(NoopLimitsCalculator))
    }
}

impl RecommendationProcessor for CappingProcessor {
    fn apply(
        &self,
        recommendation: Option<&RecommendedPodResources>,
        policy: Option<&PodResourcePolicy>,
        _conditions: &[VpaCondition],
        pod: &Pod,
    ) -> Result<(RecommendedPodResources, ContainerToAnnotationsMap)> {
        let mut annotations = ContainerToAnnotationsMap::new();
        let Some(recommendation) = recommendation else {
            return Ok((RecommendedPodResources::default(), annotations));
        };

        let limit_bounds = self
            .limits
            .container_limit_range(&pod.metadata.namespace)
            .with_context(|| {
                format!(
                    "fetching container limit range for namespace {}",
                    pod.metadata.namespace
                )
            })?;

        let mut capped = RecommendedPodResources::default();
        for container in &pod.spec.containers {
            let Some(container_rec) = recommendation.for_container(&container.name) else {
                continue;
            };
            if effective_scaling_mode(policy, &container.name) == ContainerScalingMode::Off {
                continue;
            }

            let container_policy = policy.and_then(|p| p.policy_for(&container.name));
            let (min_allowed, max_allowed) = match container_policy {
                Some(p) => (Some(&p.min_allowed), Some(&p.max_allowed)),
                None => (None, None),
            };

            let mut notes = Vec::new();
            // Keep the first uncapped target seen, so reprocessing an
            // already-capped recommendation changes nothing.
            let uncapped_target = if container_rec.uncapped_target.is_empty() {
                container_rec.target.clone()
            } else {
                container_rec.uncapped_target.clone()
            };
            let mut entry = RecommendedContainerResources {
                container_name: container.name.clone(),
                uncapped_target,
                ..Default::default()
            };
            entry.target = cap_resources(
                &container_rec.target,
                "target",
                min_allowed,
                max_allowed,
                limit_bounds.as_ref(),
                &mut notes,
            );
            entry.lower_bound = cap_resources(
                &container_rec.lower_bound,
                "lowerBound",
                min_allowed,
                max_allowed,
                limit_bounds.as_ref(),
                &mut notes,
            );
            entry.upper_bound = cap_resources(
                &container_rec.upper_bound,
                "upperBound",
                min_allowed,
                max_allowed,
                limit_bounds.as_ref(),
                &mut notes,
            );

            if !notes.is_empty() {
                annotations.insert(container.name.clone(), notes);
            }
            capped.container_recommendations.push(entry);
        }

        Ok((capped, annotations))
    }
}

fn cap_resources(
    values: &ResourceList,
    field: &str,
    min_allowed: Option<&ResourceList>,
    max_allowed: Option<&ResourceList>,
    limit_bounds: Option<&LimitRangeBounds>,
    notes: &mut Vec<String>,
) -> ResourceList {
    let mut out = ResourceList::new();
    for (resource, value) in values {
        let capped = cap_quantity(
            *resource,
            *value,
            field,
            min_allowed,
            max_allowed,
            limit_bounds,
            notes,
        );
        out.insert(*resource, capped);
    }
    out
}

fn cap_quantity(
    resource: ResourceName,
    value: Quantity,
    field: &str,
    min_allowed: Option<&ResourceList>,
    max_allowed: Option<&ResourceList>,
    limit_bounds: Option<&LimitRangeBounds>,
    notes: &mut Vec<String>,
) -> Quantity {
    let mut out = value;

    if let Some(max) = max_allowed.and_then(|m| m.get(&resource)) {
        if out > *max {
            out = *max;
            notes.push(format!("{resource} {field} capped to maxAllowed"));
        }
    }
    if let Some(min) = min_allowed.and_then(|m| m.get(&resource)) {
        if out < *min {
            out = *min;
            notes.push(format!("{resource} {field} raised to minAllowed"));
        }
    }

    if let Some(bounds) = limit_bounds {
        if let Some(max) = bounds.max_for(resource) {
            if out > max {
                out = max;
                notes.push(format!("{resource} {field} capped to limit range max"));
            }
        }
        if let Some(min) = bounds.min_for(resource) {
            if out < min {
                out = min;
                notes.push(format!("{resource} {field} raised to limit range min"));
            }
        }
    }

    out
}
