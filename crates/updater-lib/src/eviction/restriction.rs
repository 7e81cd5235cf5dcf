//! Per-workload eviction availability accounting
//!
//! Evicting too many replicas of one workload at once is an outage; this
//! module enforces the replica floor. Counters are rebuilt from the live pod
//! set every tick and only ever touched from the loop task, so no locking.

use crate::models::{Pod, PodId, PodPhase};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Identity of the topmost controller managing a group of replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

#[derive(Debug, Default, Clone)]
struct WorkloadStats {
    running: u32,
    pending: u32,
    evicted: u32,
}

impl WorkloadStats {
    fn desired(&self) -> u32 {
        self.running + self.pending
    }
}

/// Tracks how many replicas of each workload may still be disrupted this
/// tick.
pub struct EvictionRestriction {
    global_min_replicas: u32,
    eviction_tolerance: f64,
    workloads: HashMap<WorkloadKey, WorkloadStats>,
    pod_workloads: HashMap<PodId, WorkloadKey>,
}

impl EvictionRestriction {
    pub fn new(global_min_replicas: u32, eviction_tolerance: f64) -> Self {
        Self {
            global_min_replicas,
            eviction_tolerance,
            workloads: HashMap::new(),
            pod_workloads: HashMap::new(),
        }
    }

    /// Account a live pod under its resolved workload. Pods whose workload
    /// could not be resolved are simply never registered and thus never
    /// evictable.
    pub fn register(&mut self, pod: &Pod, workload: WorkloadKey) {
        let stats = self.workloads.entry(workload.clone()).or_default();
        match pod.status.phase {
            PodPhase::Running => stats.running += 1,
            // Terminal pods are neither running nor coming back; they count
            // toward nothing.
            PodPhase::Pending | PodPhase::Unknown => stats.pending += 1,
            PodPhase::Succeeded | PodPhase::Failed => {}
        }
        self.pod_workloads.insert(pod.id(), workload);
    }

    /// The replica floor for a workload: never below the global minimum, and
    /// never disrupting more than the tolerated fraction of desired
    /// replicas.
    fn floor(&self, stats: &WorkloadStats) -> u32 {
        let tolerated = (self.eviction_tolerance * f64::from(stats.desired())).ceil() as u32;
        self.global_min_replicas.max(tolerated)
    }

    /// Whether this pod may be evicted without breaching its workload's
    /// floor.
    pub fn can_evict(&self, pod: &Pod) -> bool {
        let Some(workload) = self.pod_workloads.get(&pod.id()) else {
            debug!(pod = %pod.id(), "no resolved workload, refusing eviction");
            return false;
        };
        let Some(stats) = self.workloads.get(workload) else {
            return false;
        };

        // A lone replica stuck Pending will never become Running on its own;
        // evicting it is the only way to unstick it.
        if stats.desired() == 1 && stats.pending == 1 && pod.status.phase == PodPhase::Pending {
            return true;
        }

        stats.running.saturating_sub(stats.evicted) > self.floor(stats)
    }

    /// Record a successful eviction against the pod's workload.
    pub fn record_eviction(&mut self, pod: &Pod) {
        if let Some(workload) = self.pod_workloads.get(&pod.id()) {
            if let Some(stats) = self.workloads.get_mut(workload) {
                stats.evicted += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PodBuilder;

    fn workload(name: &str) -> WorkloadKey {
        WorkloadKey {
            namespace: "default".to_string(),
            kind: "Deployment".to_string(),
            name: name.to_string(),
        }
    }

    fn running_pods(count: usize) -> Vec<Pod> {
        (0..count)
            .map(|i| {
                PodBuilder::new(&format!("pod-{i}"))
                    .container("c1", "1", "")
                    .build()
            })
            .collect()
    }

    #[test]
    fn respects_replica_floor() {
        // Three running replicas, min 2, tolerance 0.5: the floor is
        // max(2, ceil(1.5)) = 2, so exactly one eviction fits.
        let mut restriction = EvictionRestriction::new(2, 0.5);
        let pods = running_pods(3);
        for pod in &pods {
            restriction.register(pod, workload("web"));
        }

        assert!(restriction.can_evict(&pods[0]));
        restriction.record_eviction(&pods[0]);
        assert!(!restriction.can_evict(&pods[1]));
        assert!(!restriction.can_evict(&pods[2]));
    }

    #[test]
    fn eviction_count_never_exceeds_headroom() {
        let mut restriction = EvictionRestriction::new(2, 0.5);
        let pods = running_pods(10);
        for pod in &pods {
            restriction.register(pod, workload("web"));
        }

        // floor = max(2, ceil(5)) = 5: headroom is 10 - 5 = 5.
        let mut evicted = 0;
        for pod in &pods {
            if restriction.can_evict(pod) {
                restriction.record_eviction(pod);
                evicted += 1;
            }
        }
        assert_eq!(evicted, 5);
    }

    #[test]
    fn small_workloads_are_never_disrupted() {
        let mut restriction = EvictionRestriction::new(2, 0.5);
        let pods = running_pods(1);
        restriction.register(&pods[0], workload("web"));

        assert!(!restriction.can_evict(&pods[0]));
    }

    #[test]
    fn stuck_pending_singleton_is_evictable() {
        let mut restriction = EvictionRestriction::new(2, 0.5);
        let pod = PodBuilder::new("pod-0")
            .container("c1", "1", "")
            .phase(PodPhase::Pending)
            .build();
        restriction.register(&pod, workload("web"));

        assert!(restriction.can_evict(&pod));
    }

    #[test]
    fn pending_replicas_do_not_add_eviction_headroom() {
        // Two running and two pending: desired 4, floor max(2, 2) = 2, so
        // running - floor leaves no headroom.
        let mut restriction = EvictionRestriction::new(2, 0.5);
        let running = running_pods(2);
        for pod in &running {
            restriction.register(pod, workload("web"));
        }
        for i in 0..2 {
            let pod = PodBuilder::new(&format!("pending-{i}"))
                .container("c1", "1", "")
                .phase(PodPhase::Pending)
                .build();
            restriction.register(&pod, workload("web"));
        }

        assert!(!restriction.can_evict(&running[0]));
    }

    #[test]
    fn unregistered_pod_is_refused() {
        let restriction = EvictionRestriction::new(2, 0.5);
        let pod = PodBuilder::new("stray").container("c1", "1", "").build();
        assert!(!restriction.can_evict(&pod));
    }

    #[test]
    fn workloads_are_isolated() {
        let mut restriction = EvictionRestriction::new(1, 0.0);
        let web = running_pods(2);
        for pod in &web {
            restriction.register(pod, workload("web"));
        }
        let api = PodBuilder::new("api-0").container("c1", "1", "").build();
        restriction.register(&api, workload("api"));

        assert!(restriction.can_evict(&web[0]));
        restriction.record_eviction(&web[0]);
        // web is exhausted, api was never touched but has no headroom of
        // its own (1 running, floor 1).
        assert!(!restriction.can_evict(&web[1]));
        assert!(!restriction.can_evict(&api));
    }

    #[test]
    fn zero_tolerance_uses_global_minimum_only() {
        let mut restriction = EvictionRestriction::new(2, 0.0);
        let pods = running_pods(5);
        for pod in &pods {
            restriction.register(pod, workload("web"));
        }

        let mut evicted = 0;
        for pod in &pods {
            if restriction.can_evict(pod) {
                restriction.record_eviction(pod);
                evicted += 1;
            }
        }
        // floor = max(2, 0) = 2: three evictions fit.
        assert_eq!(evicted, 3);
    }
}
