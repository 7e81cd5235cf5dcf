//! Eviction admission chain
//!
//! A pluggable gate deciding whether a given pod may be evicted right now,
//! independent of priority. Gates compose sequentially under AND; the first
//! refusal short-circuits. `loop_init` runs once per tick before any
//! `admit`, and `clean_up` runs when no autoscalers remain so stateful gates
//! can release what they hold.

use crate::models::{Pod, RecommendedPodResources, VpaId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pods grouped by the autoscaler controlling them, as seen at tick start.
pub type VpaControlledPods = BTreeMap<VpaId, Vec<Pod>>;

pub trait PodEvictionAdmission: Send + Sync {
    /// Called once per tick with the live pods and the autoscaler-controlled
    /// grouping, before any `admit` call.
    fn loop_init(&self, live_pods: &[Pod], vpa_controlled_pods: &VpaControlledPods);

    /// Whether the pod may be evicted with the given processed
    /// recommendation. May be consulted more than once per pod within a
    /// tick.
    fn admit(&self, pod: &Pod, recommendation: &RecommendedPodResources) -> bool;

    /// Called when no autoscalers remain in the cluster.
    fn clean_up(&self);
}

/// Admission that admits every pod.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvictionAdmission;

impl PodEvictionAdmission for NoopEvictionAdmission {
    fn loop_init(&self, _live_pods: &[Pod], _vpa_controlled_pods: &VpaControlledPods) {}

    fn admit(&self, _pod: &Pod, _recommendation: &RecommendedPodResources) -> bool {
        true
    }

    fn clean_up(&self) {}
}

/// Chains admissions in order; all must admit.
pub struct SequentialEvictionAdmission {
    admissions: Vec<Arc<dyn PodEvictionAdmission>>,
}

impl SequentialEvictionAdmission {
    pub fn new(admissions: Vec<Arc<dyn PodEvictionAdmission>>) -> Self {
        Self { admissions }
    }
}

impl PodEvictionAdmission for SequentialEvictionAdmission {
    fn loop_init(&self, live_pods: &[Pod], vpa_controlled_pods: &VpaControlledPods) {
        for admission in &self.admissions {
            admission.loop_init(live_pods, vpa_controlled_pods);
        }
    }

    fn admit(&self, pod: &Pod, recommendation: &RecommendedPodResources) -> bool {
        self.admissions
            .iter()
            .all(|admission| admission.admit(pod, recommendation))
    }

    fn clean_up(&self) {
        for admission in &self.admissions {
            admission.clean_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PodBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdmission {
        admit: bool,
        admit_calls: AtomicUsize,
        init_calls: AtomicUsize,
        clean_up_calls: AtomicUsize,
    }

    impl CountingAdmission {
        fn new(admit: bool) -> Self {
            Self {
                admit,
                admit_calls: AtomicUsize::new(0),
                init_calls: AtomicUsize::new(0),
                clean_up_calls: AtomicUsize::new(0),
            }
        }
    }

    impl PodEvictionAdmission for CountingAdmission {
        fn loop_init(&self, _live_pods: &[Pod], _vpa_controlled_pods: &VpaControlledPods) {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn admit(&self, _pod: &Pod, _recommendation: &RecommendedPodResources) -> bool {
            self.admit_calls.fetch_add(1, Ordering::SeqCst);
            self.admit
        }

        fn clean_up(&self) {
            self.clean_up_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sequential_requires_all_to_admit() {
        let yes = Arc::new(CountingAdmission::new(true));
        let no = Arc::new(CountingAdmission::new(false));
        let chain = SequentialEvictionAdmission::new(vec![
            yes.clone() as Arc<dyn PodEvictionAdmission>,
            no.clone(),
            yes.clone(),
        ]);

        let pod = PodBuilder::new("pod-1").container("c1", "1", "").build();
        assert!(!chain.admit(&pod, &RecommendedPodResources::default()));
        // Third element is short-circuited: yes admits once, no once.
        assert_eq!(yes.admit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(no.admit_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sequential_fans_out_lifecycle_calls() {
        let first = Arc::new(CountingAdmission::new(true));
        let second = Arc::new(CountingAdmission::new(true));
        let chain = SequentialEvictionAdmission::new(vec![
            first.clone() as Arc<dyn PodEvictionAdmission>,
            second.clone(),
        ]);

        chain.loop_init(&[], &VpaControlledPods::new());
        chain.clean_up();

        assert_eq!(first.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.init_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.clean_up_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.clean_up_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_admits_everything() {
        let pod = PodBuilder::new("pod-1").container("c1", "1", "").build();
        let admission = NoopEvictionAdmission;
        assert!(admission.admit(&pod, &RecommendedPodResources::default()));
    }
}
