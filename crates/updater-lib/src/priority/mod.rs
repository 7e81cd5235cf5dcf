//! Update priority computation and candidate ranking
//!
//! Decides which pods are worth restarting for a processed recommendation
//! and in what order. Priorities are recomputed from scratch every tick;
//! nothing here survives between ticks.

mod admission;
mod calculator;
mod processor;

pub use admission::{
    NoopEvictionAdmission, PodEvictionAdmission, SequentialEvictionAdmission, VpaControlledPods,
};
pub use calculator::{compare_priority, PrioritizedPod, UpdatePriorityCalculator};
pub use processor::{DefaultPriorityProcessor, PriorityProcessor};

use chrono::Duration;

/// Priority of a pod update, dimensionless.
///
/// `resource_diff` pools per-resource request totals across the pod's
/// observed containers and sums the relative divergence from the
/// recommendation, so CPU and memory contribute as unitless ratios.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PodPriority {
    /// Any observed container's request sits outside its recommended
    /// [lowerBound, upperBound].
    pub outside_recommended_range: bool,
    /// Any observed container's target exceeds its current request.
    pub scale_up: bool,
    /// Summed relative divergence of requests from targets.
    pub resource_diff: f64,
}

/// Thresholds governing eligibility decisions.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Minimum resource diff for updating a long-lived pod that is still
    /// inside its recommended range.
    pub min_change_priority: f64,
    /// Age after which in-range pods become updatable on diff alone.
    pub pod_lifetime_update_threshold: Duration,
    /// Maximum container lifetime for an OOM kill to count as quick.
    pub quick_oom_threshold: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            min_change_priority: 0.1,
            pod_lifetime_update_threshold: Duration::hours(12),
            quick_oom_threshold: Duration::minutes(10),
        }
    }
}

impl UpdateConfig {
    pub fn with_min_change_priority(min_change_priority: f64) -> Self {
        Self {
            min_change_priority,
            ..Default::default()
        }
    }
}
