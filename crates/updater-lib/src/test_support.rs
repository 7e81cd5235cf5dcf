//! Builders shared by unit tests across the crate.

use crate::models::{
    resources, Container, ContainerResourcePolicy, ContainerScalingMode, ContainerState,
    ContainerStateTerminated, ContainerStatus, LabelSelector, OwnerReference, Pod, PodPhase,
    PodResourcePolicy, PodUpdatePolicy, RecommendedContainerResources, RecommendedPodResources,
    TargetRef, UpdateMode, VerticalPodAutoscaler, VpaCondition,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Fixed instant all test pods start at; "now" in tests is derived from it.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(name: &str) -> Self {
        let mut pod = Pod::default();
        pod.metadata.name = name.to_string();
        pod.metadata.namespace = "default".to_string();
        pod.status.phase = PodPhase::Running;
        pod.status.start_time = Some(base_time());
        Self { pod }
    }

    pub fn container(mut self, name: &str, cpu: &str, memory: &str) -> Self {
        let mut container = Container::default();
        container.name = name.to_string();
        container.resources.requests = resources(cpu, memory).unwrap();
        self.pod.spec.containers.push(container);
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn phase(mut self, phase: PodPhase) -> Self {
        self.pod.status.phase = phase;
        self
    }

    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.pod.status.start_time = Some(start);
        self
    }

    pub fn no_start_time(mut self) -> Self {
        self.pod.status.start_time = None;
        self
    }

    pub fn owner(mut self, kind: &str, name: &str) -> Self {
        self.pod.metadata.owner_references.push(OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            controller: Some(true),
        });
        self
    }

    pub fn last_termination(
        mut self,
        container: &str,
        reason: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        self.pod.status.container_statuses.push(ContainerStatus {
            name: container.to_string(),
            last_state: ContainerState {
                terminated: Some(ContainerStateTerminated {
                    reason: reason.to_string(),
                    started_at: Some(started_at),
                    finished_at: Some(finished_at),
                }),
            },
        });
        self
    }

    pub fn deleted(mut self) -> Self {
        self.pod.metadata.deletion_timestamp = Some(base_time());
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

pub struct RecommendationBuilder {
    current: Option<RecommendedContainerResources>,
    done: Vec<RecommendedContainerResources>,
}

impl RecommendationBuilder {
    pub fn new() -> Self {
        Self {
            current: None,
            done: Vec::new(),
        }
    }

    /// Start a new per-container entry; subsequent bound setters apply to it.
    pub fn container(mut self, name: &str) -> Self {
        if let Some(entry) = self.current.take() {
            self.done.push(entry);
        }
        self.current = Some(RecommendedContainerResources {
            container_name: name.to_string(),
            ..Default::default()
        });
        self
    }

    fn entry(&mut self) -> &mut RecommendedContainerResources {
        self.current
            .as_mut()
            .expect("call container() before setting bounds")
    }

    pub fn target(mut self, cpu: &str, memory: &str) -> Self {
        self.entry().target = resources(cpu, memory).unwrap();
        self
    }

    pub fn lower_bound(mut self, cpu: &str, memory: &str) -> Self {
        self.entry().lower_bound = resources(cpu, memory).unwrap();
        self
    }

    pub fn upper_bound(mut self, cpu: &str, memory: &str) -> Self {
        self.entry().upper_bound = resources(cpu, memory).unwrap();
        self
    }

    pub fn build(mut self) -> RecommendedPodResources {
        if let Some(entry) = self.current.take() {
            self.done.push(entry);
        }
        RecommendedPodResources {
            container_recommendations: self.done,
        }
    }
}

pub struct VpaBuilder {
    vpa: VerticalPodAutoscaler,
}

impl VpaBuilder {
    pub fn new(name: &str) -> Self {
        let mut vpa = VerticalPodAutoscaler::default();
        vpa.metadata.name = name.to_string();
        vpa.metadata.namespace = "default".to_string();
        Self { vpa }
    }

    pub fn update_mode(mut self, mode: UpdateMode) -> Self {
        self.vpa.spec.update_policy = Some(PodUpdatePolicy {
            update_mode: Some(mode),
        });
        self
    }

    pub fn target_ref(mut self, kind: &str, name: &str) -> Self {
        self.vpa.spec.target_ref = Some(TargetRef {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn container_policy(mut self, policy: ContainerResourcePolicy) -> Self {
        self.vpa
            .spec
            .resource_policy
            .get_or_insert_with(Default::default)
            .container_policies
            .push(policy);
        self
    }

    pub fn container_mode(self, container: &str, mode: ContainerScalingMode) -> Self {
        self.container_policy(ContainerResourcePolicy {
            container_name: container.to_string(),
            mode: Some(mode),
            ..Default::default()
        })
    }

    pub fn recommendation(mut self, recommendation: RecommendedPodResources) -> Self {
        self.vpa.status.recommendation = Some(recommendation);
        self
    }

    pub fn condition(mut self, condition_type: &str, status: &str) -> Self {
        self.vpa.status.conditions.push(VpaCondition {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            ..Default::default()
        });
        self
    }

    pub fn build(self) -> VerticalPodAutoscaler {
        self.vpa
    }
}

/// Label map literal helper.
pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Selector over a single `app=<name>` label.
pub fn app_selector(app: &str) -> LabelSelector {
    LabelSelector::from_labels(labels(&[("app", app)]))
}

use crate::cluster::{
    AdmissionControllerStatus, ClusterGateway, ControllerFetcher, EvictionOutcome,
    TargetSelectorFetcher,
};
use crate::eviction::WorkloadKey;
use crate::models::PodId;
use crate::recommendation::LimitRange;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory cluster standing in for the API server.
///
/// Selectors resolve to `app=<targetRef name>` unless overridden, and a
/// pod's workload is read straight off its controller owner reference.
#[derive(Default)]
pub struct FakeCluster {
    vpas: Mutex<Vec<VerticalPodAutoscaler>>,
    pods: Mutex<Vec<Pod>>,
    limit_ranges: Mutex<Vec<LimitRange>>,
    admission_status: Mutex<Option<AdmissionControllerStatus>>,
    evicted: Mutex<Vec<PodId>>,
    reject_evictions: AtomicBool,
    fail_evictions: AtomicBool,
    fail_status: AtomicBool,
    fail_pod_listing: AtomicBool,
    fail_limit_range_listing: AtomicBool,
    fail_selector_for: Mutex<BTreeSet<String>>,
    fail_workload_for: Mutex<BTreeSet<String>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vpa(&self, vpa: VerticalPodAutoscaler) {
        self.vpas.lock().unwrap().push(vpa);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().unwrap().push(pod);
    }

    pub fn add_limit_range(&self, limit_range: LimitRange) {
        self.limit_ranges.lock().unwrap().push(limit_range);
    }

    pub fn set_admission_status(&self, holder: &str, last_update: Option<DateTime<Utc>>) {
        *self.admission_status.lock().unwrap() = Some(AdmissionControllerStatus {
            holder_identity: holder.to_string(),
            last_update_time: last_update,
        });
    }

    pub fn fail_status_reads(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub fn fail_pod_listings(&self) {
        self.fail_pod_listing.store(true, Ordering::SeqCst);
    }

    pub fn fail_limit_range_listings(&self) {
        self.fail_limit_range_listing.store(true, Ordering::SeqCst);
    }

    pub fn reject_evictions(&self) {
        self.reject_evictions.store(true, Ordering::SeqCst);
    }

    pub fn fail_evictions(&self) {
        self.fail_evictions.store(true, Ordering::SeqCst);
    }

    pub fn fail_selector_for(&self, vpa_name: &str) {
        self.fail_selector_for
            .lock()
            .unwrap()
            .insert(vpa_name.to_string());
    }

    pub fn fail_workload_for(&self, pod_name: &str) {
        self.fail_workload_for
            .lock()
            .unwrap()
            .insert(pod_name.to_string());
    }

    pub fn evicted(&self) -> Vec<PodId> {
        self.evicted.lock().unwrap().clone()
    }

    pub fn evicted_names(&self) -> Vec<String> {
        self.evicted().into_iter().map(|id| id.name).collect()
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<VerticalPodAutoscaler>> {
        Ok(self
            .vpas
            .lock()
            .unwrap()
            .iter()
            .filter(|v| namespace.is_empty() || v.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        if self.fail_pod_listing.load(Ordering::SeqCst) {
            bail!("pod listing unavailable");
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| namespace.is_empty() || p.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>> {
        if self.fail_limit_range_listing.load(Ordering::SeqCst) {
            bail!("limit range listing unavailable");
        }
        Ok(self
            .limit_ranges
            .lock()
            .unwrap()
            .iter()
            .filter(|l| namespace.is_empty() || l.metadata.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn admission_controller_status(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<AdmissionControllerStatus>> {
        if self.fail_status.load(Ordering::SeqCst) {
            bail!("status read unavailable");
        }
        Ok(self.admission_status.lock().unwrap().clone())
    }

    async fn evict_pod(&self, pod: &PodId) -> Result<EvictionOutcome> {
        if self.fail_evictions.load(Ordering::SeqCst) {
            bail!("eviction endpoint unavailable");
        }
        if self.reject_evictions.load(Ordering::SeqCst) {
            return Ok(EvictionOutcome::Rejected(
                "disruption budget violated".to_string(),
            ));
        }
        self.evicted.lock().unwrap().push(pod.clone());
        Ok(EvictionOutcome::Evicted)
    }
}

#[async_trait]
impl TargetSelectorFetcher for FakeCluster {
    async fn fetch_selector(&self, vpa: &VerticalPodAutoscaler) -> Result<LabelSelector> {
        if self
            .fail_selector_for
            .lock()
            .unwrap()
            .contains(&vpa.metadata.name)
        {
            bail!("selector fetch failed for {}", vpa.id());
        }
        let target = vpa
            .spec
            .target_ref
            .as_ref()
            .ok_or_else(|| anyhow!("autoscaler {} has no targetRef", vpa.id()))?;
        Ok(app_selector(&target.name))
    }
}

#[async_trait]
impl ControllerFetcher for FakeCluster {
    async fn topmost_workload(&self, pod: &Pod) -> Result<Option<WorkloadKey>> {
        if self
            .fail_workload_for
            .lock()
            .unwrap()
            .contains(&pod.metadata.name)
        {
            bail!("workload resolution failed for {}", pod.id());
        }
        Ok(pod
            .metadata
            .owner_references
            .iter()
            .find(|r| r.controller.unwrap_or(false))
            .map(|owner| WorkloadKey {
                namespace: pod.metadata.namespace.clone(),
                kind: owner.kind.clone(),
                name: owner.name.clone(),
            }))
    }
}
