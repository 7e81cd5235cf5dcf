//! Priority computation for a (pod, recommendation) pair

use super::PodPriority;
use crate::models::{
    effective_scaling_mode, ContainerScalingMode, Pod, PodResourcePolicy, RecommendedPodResources,
    ResourceName,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Computes the update priority of a pod against a processed recommendation.
///
/// A seam so the calculator can be exercised with canned priorities.
pub trait PriorityProcessor: Send + Sync {
    fn get_update_priority(
        &self,
        pod: &Pod,
        policy: Option<&PodResourcePolicy>,
        recommendation: Option<&RecommendedPodResources>,
    ) -> PodPriority;
}

/// Production priority processor.
///
/// Containers outside the observed set, containers scaled Off, and
/// containers without a recommendation entry contribute nothing; a pod where
/// nothing contributes ends up with a zero diff and no flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPriorityProcessor;

impl PriorityProcessor for DefaultPriorityProcessor {
    fn get_update_priority(
        &self,
        pod: &Pod,
        policy: Option<&PodResourcePolicy>,
        recommendation: Option<&RecommendedPodResources>,
    ) -> PodPriority {
        let observed = pod.observed_containers();
        let mut scale_up = false;
        let mut outside_recommended_range = false;
        // Request and recommendation totals pooled per resource across the
        // pod's contributing containers, in that resource's base units.
        let mut total_request: BTreeMap<ResourceName, i64> = BTreeMap::new();
        let mut total_recommended: BTreeMap<ResourceName, i64> = BTreeMap::new();

        for container in &pod.spec.containers {
            if let Some(observed) = &observed {
                if !observed.contains(&container.name) {
                    debug!(
                        pod = %pod.id(),
                        container = %container.name,
                        "not listed in observed containers, skipping"
                    );
                    continue;
                }
            }
            if effective_scaling_mode(policy, &container.name) == ContainerScalingMode::Off {
                continue;
            }
            let Some(container_rec) =
                recommendation.and_then(|r| r.for_container(&container.name))
            else {
                continue;
            };

            for (resource, target) in &container_rec.target {
                let target_base = resource.base_value(*target);
                *total_recommended.entry(*resource).or_insert(0) += target_base;

                match container.resources.requests.get(resource) {
                    Some(request) => {
                        let request_base = resource.base_value(*request);
                        *total_request.entry(*resource).or_insert(0) += request_base;
                        if target_base > request_base {
                            scale_up = true;
                        }
                        let below = container_rec
                            .lower_bound
                            .get(resource)
                            .is_some_and(|lower| request < lower);
                        let above = container_rec
                            .upper_bound
                            .get(resource)
                            .is_some_and(|upper| request > upper);
                        if below || above {
                            outside_recommended_range = true;
                        }
                    }
                    None => {
                        // A container without a request falls back to the
                        // namespace default, which the updater does not see.
                        // Treat it as urgently divergent.
                        scale_up = true;
                        outside_recommended_range = true;
                    }
                }
            }
        }

        let mut resource_diff = 0.0;
        for (resource, recommended) in &total_recommended {
            // Denominator floored at one base unit (1 milli-CPU, 1 byte) so
            // zero-request containers still produce a finite ratio.
            let request = (total_request.get(resource).copied().unwrap_or(0) as f64).max(1.0);
            resource_diff += (request - *recommended as f64).abs() / request;
        }

        PodPriority {
            outside_recommended_range,
            scale_up,
            resource_diff,
        }
    }
}
