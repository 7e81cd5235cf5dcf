//! Candidate registration and ranking
//!
//! One calculator instance lives per autoscaler per tick. `add_pod` applies
//! the eligibility rules, `get_sorted_pods` returns the admitted survivors
//! in decreasing eviction priority.

use super::{PodEvictionAdmission, PodPriority, PriorityProcessor, UpdateConfig};
use crate::models::{
    effective_scaling_mode, ContainerScalingMode, Pod, PodResourcePolicy,
    RecommendedPodResources, VpaCondition, OOM_KILLED_REASON,
};
use crate::recommendation::RecommendationProcessor;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// A pod accepted for update, with the processed recommendation it was
/// judged against.
#[derive(Debug, Clone)]
pub struct PrioritizedPod {
    pub pod: Pod,
    pub priority: PodPriority,
    pub recommendation: RecommendedPodResources,
}

pub struct UpdatePriorityCalculator {
    policy: Option<PodResourcePolicy>,
    conditions: Vec<VpaCondition>,
    config: UpdateConfig,
    processor: Arc<dyn PriorityProcessor>,
    recommendation_processor: Arc<dyn RecommendationProcessor>,
    pods: Vec<PrioritizedPod>,
}

impl UpdatePriorityCalculator {
    pub fn new(
        policy: Option<PodResourcePolicy>,
        conditions: Vec<VpaCondition>,
        config: UpdateConfig,
        processor: Arc<dyn PriorityProcessor>,
        recommendation_processor: Arc<dyn RecommendationProcessor>,
    ) -> Self {
        Self {
            policy,
            conditions,
            config,
            processor,
            recommendation_processor,
            pods: Vec::new(),
        }
    }

    /// Register a pod as a potential update candidate.
    ///
    /// The recommendation is capped first; eligibility is then decided on
    /// the capped values. Ineligible pods are dropped silently at debug
    /// level, matching the policy that a skipped pod is not an error.
    pub fn add_pod(
        &mut self,
        pod: &Pod,
        recommendation: Option<&RecommendedPodResources>,
        now: DateTime<Utc>,
    ) {
        let (processed, _capping_notes) = match self.recommendation_processor.apply(
            recommendation,
            self.policy.as_ref(),
            &self.conditions,
            pod,
        ) {
            Ok(result) => result,
            Err(error) => {
                warn!(pod = %pod.id(), error = %error, "cannot process recommendation, skipping pod");
                return;
            }
        };

        let priority = self
            .processor
            .get_update_priority(pod, self.policy.as_ref(), Some(&processed));
        let quick_oom = self.has_quick_oom(pod);

        if !priority.outside_recommended_range && !quick_oom {
            let Some(start_time) = pod.status.start_time else {
                debug!(pod = %pod.id(), "missing start time, skipping");
                return;
            };
            if now < start_time + self.config.pod_lifetime_update_threshold {
                debug!(pod = %pod.id(), "short-lived and in range, skipping");
                return;
            }
            if priority.resource_diff < self.config.min_change_priority {
                debug!(
                    pod = %pod.id(),
                    resource_diff = priority.resource_diff,
                    "resource diff below change threshold, skipping"
                );
                return;
            }
        }

        // An OOM loop alone is not actionable: evicting without a resource
        // change would recreate an identical pod.
        if quick_oom && priority.resource_diff == 0.0 {
            debug!(pod = %pod.id(), "quick OOM but resources would not change, skipping");
            return;
        }

        debug!(
            pod = %pod.id(),
            resource_diff = priority.resource_diff,
            scale_up = priority.scale_up,
            outside_range = priority.outside_recommended_range,
            quick_oom,
            "pod accepted for update"
        );
        self.pods.push(PrioritizedPod {
            pod: pod.clone(),
            priority,
            recommendation: processed,
        });
    }

    /// Whether any observed, scalable container was OOM killed shortly
    /// after starting.
    fn has_quick_oom(&self, pod: &Pod) -> bool {
        let observed = pod.observed_containers();
        pod.status.container_statuses.iter().any(|status| {
            let Some(terminated) = &status.last_state.terminated else {
                return false;
            };
            if terminated.reason != OOM_KILLED_REASON {
                return false;
            }
            let (Some(started), Some(finished)) = (terminated.started_at, terminated.finished_at)
            else {
                return false;
            };
            if finished - started > self.config.quick_oom_threshold {
                return false;
            }
            if let Some(observed) = &observed {
                if !observed.contains(&status.name) {
                    return false;
                }
            }
            effective_scaling_mode(self.policy.as_ref(), &status.name)
                != ContainerScalingMode::Off
        })
    }

    /// Admitted candidates in decreasing eviction priority: scale-ups first,
    /// then larger diffs, name as the deterministic tie-break.
    pub fn get_sorted_candidates(
        &self,
        admission: &dyn PodEvictionAdmission,
    ) -> Vec<PrioritizedPod> {
        let mut candidates: Vec<PrioritizedPod> = self
            .pods
            .iter()
            .filter(|candidate| admission.admit(&candidate.pod, &candidate.recommendation))
            .cloned()
            .collect();
        candidates.sort_by(compare_priority);
        candidates
    }

    /// Like `get_sorted_candidates`, returning just the pods.
    pub fn get_sorted_pods(&self, admission: &dyn PodEvictionAdmission) -> Vec<Pod> {
        self.get_sorted_candidates(admission)
            .into_iter()
            .map(|candidate| candidate.pod)
            .collect()
    }
}

/// Total order over candidates; shared with the updater loop's cross-VPA
/// merge.
pub fn compare_priority(a: &PrioritizedPod, b: &PrioritizedPod) -> Ordering {
    b.priority
        .scale_up
        .cmp(&a.priority.scale_up)
        .then_with(|| b.priority.resource_diff.total_cmp(&a.priority.resource_diff))
        .then_with(|| a.pod.metadata.name.cmp(&b.pod.metadata.name))
}
