//! Tick driver and the per-tick eviction pipeline
//!
//! One tick: list autoscalers, resolve selectors, consult the status gate,
//! classify pods, rank candidates across all autoscalers, then evict under
//! the replica floor and the global rate limit. Errors inside one
//! autoscaler's processing never abort the tick; errors inside one pod's
//! processing never abort its autoscaler.

use crate::clock::Clock;
use crate::cluster::{
    ClusterGateway, ControllerFetcher, EvictionOutcome, TargetSelectorFetcher,
};
use crate::eviction::{EvictionRateLimiter, EvictionRestriction};
use crate::health::HealthRegistry;
use crate::models::{
    LabelSelector, Pod, PodId, VerticalPodAutoscaler, VpaId, CONDITION_CONFIG_UNSUPPORTED,
};
use crate::observability::{error_kinds, EvictionLogger, UpdaterMetrics};
use crate::priority::{
    compare_priority, PodEvictionAdmission, PriorityProcessor, PrioritizedPod, UpdateConfig,
    UpdatePriorityCalculator, VpaControlledPods,
};
use crate::recommendation::{
    CappingProcessor, LimitRangeCalculator, LimitRangeSnapshot, NoopLimitsCalculator,
};
use crate::status::{AdmissionStatusGate, GateState};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Loop-level knobs; the flag surface of the binary maps onto this.
#[derive(Debug, Clone)]
pub struct UpdaterLoopConfig {
    /// Tick period; also the hard deadline of each tick.
    pub interval: Duration,
    /// Namespace to scan for autoscaler objects; empty means all.
    pub namespace: String,
    /// Floor under which a workload is never evicted.
    pub min_replicas: u32,
    /// Fraction of desired replicas that may be disrupted concurrently.
    pub eviction_tolerance: f64,
    /// Evictions per second; zero or negative disables rate limiting.
    pub eviction_rate_limit: f64,
    /// Rate limiter burst.
    pub eviction_rate_burst: u32,
    /// Priority thresholds.
    pub update_config: UpdateConfig,
    /// Whether to consult LimitRange objects when capping.
    pub limit_ranges_enabled: bool,
}

impl Default for UpdaterLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            namespace: String::new(),
            min_replicas: 2,
            eviction_tolerance: 0.5,
            eviction_rate_limit: -1.0,
            eviction_rate_burst: 1,
            update_config: UpdateConfig::default(),
            limit_ranges_enabled: true,
        }
    }
}

/// What one tick saw and did.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickStats {
    pub vpas: usize,
    pub controlled_pods: usize,
    pub candidates: usize,
    pub evictions: usize,
    pub gate_open: bool,
}

pub struct UpdaterLoop {
    config: UpdaterLoopConfig,
    gateway: Arc<dyn ClusterGateway>,
    selector_fetcher: Arc<dyn TargetSelectorFetcher>,
    controller_fetcher: Arc<dyn ControllerFetcher>,
    admission: Arc<dyn PodEvictionAdmission>,
    status_gate: AdmissionStatusGate,
    priority_processor: Arc<dyn PriorityProcessor>,
    rate_limiter: EvictionRateLimiter,
    clock: Arc<dyn Clock>,
    health: HealthRegistry,
    metrics: UpdaterMetrics,
    logger: EvictionLogger,
}

impl UpdaterLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UpdaterLoopConfig,
        gateway: Arc<dyn ClusterGateway>,
        selector_fetcher: Arc<dyn TargetSelectorFetcher>,
        controller_fetcher: Arc<dyn ControllerFetcher>,
        admission: Arc<dyn PodEvictionAdmission>,
        status_gate: AdmissionStatusGate,
        priority_processor: Arc<dyn PriorityProcessor>,
        clock: Arc<dyn Clock>,
        health: HealthRegistry,
    ) -> Self {
        let rate_limiter = EvictionRateLimiter::new(
            config.eviction_rate_limit,
            config.eviction_rate_burst,
            clock.clone(),
        );
        Self {
            config,
            gateway,
            selector_fetcher,
            controller_fetcher,
            admission,
            status_gate,
            priority_processor,
            rate_limiter,
            clock,
            health,
            metrics: UpdaterMetrics::new(),
            logger: EvictionLogger::new("updater"),
        }
    }

    /// Drive ticks until shutdown. Ticks never overlap: a tick that overruns
    /// is cancelled at its deadline and the next one starts at the next
    /// scheduled period, with no catch-up bursts.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            namespace = %self.config.namespace,
            "Starting updater loop"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let deadline = self.config.interval;
                    if tokio::time::timeout(deadline, self.run_once()).await.is_err() {
                        warn!("tick exceeded its deadline and was cancelled");
                        self.metrics.inc_tick_overrun();
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down updater loop");
                    break;
                }
            }
        }
    }

    /// Execute one full tick.
    pub async fn run_once(&mut self) -> TickStats {
        let started = Instant::now();
        let stats = self.tick().await;
        let elapsed = started.elapsed();

        self.metrics.set_vpas_processed(stats.vpas as i64);
        self.metrics.set_controlled_pods(stats.controlled_pods as i64);
        self.metrics.set_candidate_pods(stats.candidates as i64);
        self.metrics.observe_tick(elapsed.as_secs_f64());
        self.logger.log_tick_summary(
            stats.vpas,
            stats.controlled_pods,
            stats.candidates,
            stats.evictions,
            elapsed.as_millis(),
        );
        self.health.record_activity().await;
        stats
    }

    async fn tick(&mut self) -> TickStats {
        let now = self.clock.now();
        let mut stats = TickStats::default();

        let autoscalers = match self.gateway.list_autoscalers(&self.config.namespace).await {
            Ok(autoscalers) => autoscalers,
            Err(err) => {
                error!(error = %err, "failed to list autoscalers");
                self.metrics.inc_error(error_kinds::VPA_LIST);
                return stats;
            }
        };

        let active = self.resolve_updatable(autoscalers).await;
        if active.is_empty() {
            debug!("no autoscalers in an eviction-producing mode");
            self.admission.clean_up();
            return stats;
        }
        stats.vpas = active.len();

        let gate = match self.status_gate.check().await {
            Ok(gate) => gate,
            Err(err) => {
                error!(error = %err, "failed to read admission controller status");
                self.metrics.inc_error(error_kinds::STATUS_READ);
                GateState::Closed("status read failed".to_string())
            }
        };
        self.metrics.set_status_gate_open(gate.is_open());
        if let GateState::Closed(reason) = gate {
            self.logger.log_gate_closed(&reason);
            return stats;
        }
        stats.gate_open = true;

        let pods = match self.gateway.list_pods(&self.config.namespace).await {
            Ok(pods) => pods,
            Err(err) => {
                error!(error = %err, "failed to list pods");
                self.metrics.inc_error(error_kinds::POD_LIST);
                return stats;
            }
        };
        let live_pods: Vec<Pod> = pods
            .into_iter()
            .filter(|pod| !pod.is_marked_for_deletion())
            .collect();

        let controlled = group_by_controlling_vpa(&live_pods, &active);
        stats.controlled_pods = controlled.values().map(Vec::len).sum();

        self.admission.loop_init(&live_pods, &controlled);

        let (mut restriction, unresolved) = self.build_restriction(&live_pods).await;
        let recommendation_processor = Arc::new(CappingProcessor::new(
            self.limit_range_calculator().await,
        ));

        let mut candidates: Vec<(VpaId, PrioritizedPod)> = Vec::new();
        for (vpa, _selector) in &active {
            let vpa_id = vpa.id();
            let Some(vpa_pods) = controlled.get(&vpa_id) else {
                continue;
            };
            // A workload-resolution failure makes this autoscaler
            // unsupported for the tick; other autoscalers proceed.
            if vpa_pods.iter().any(|pod| unresolved.contains(&pod.id())) {
                warn!(vpa = %vpa_id, "workload resolution failed, skipping autoscaler this tick");
                continue;
            }

            let mut calculator = UpdatePriorityCalculator::new(
                vpa.resource_policy().cloned(),
                vpa.status.conditions.clone(),
                self.config.update_config.clone(),
                self.priority_processor.clone(),
                recommendation_processor.clone(),
            );
            for pod in vpa_pods {
                calculator.add_pod(pod, vpa.status.recommendation.as_ref(), now);
            }
            for candidate in calculator.get_sorted_candidates(self.admission.as_ref()) {
                candidates.push((vpa_id.clone(), candidate));
            }
        }
        candidates.sort_by(|a, b| compare_priority(&a.1, &b.1));
        stats.candidates = candidates.len();

        for (vpa_id, candidate) in &candidates {
            if !self
                .admission
                .admit(&candidate.pod, &candidate.recommendation)
            {
                continue;
            }
            if !restriction.can_evict(&candidate.pod) {
                debug!(pod = %candidate.pod.id(), "workload at its replica floor, skipping");
                continue;
            }
            if !self.rate_limiter.try_evict() {
                info!("eviction rate limit reached, dropping remaining candidates");
                break;
            }
            match self.gateway.evict_pod(&candidate.pod.id()).await {
                Ok(EvictionOutcome::Evicted) => {
                    restriction.record_eviction(&candidate.pod);
                    stats.evictions += 1;
                    self.metrics.inc_evictions();
                    self.logger.log_eviction(
                        &candidate.pod.id().to_string(),
                        &vpa_id.to_string(),
                        candidate.priority.resource_diff,
                        candidate.priority.scale_up,
                        candidate.priority.outside_recommended_range,
                    );
                }
                Ok(EvictionOutcome::Rejected(reason)) => {
                    self.metrics.inc_evictions_rejected();
                    self.logger
                        .log_eviction_rejected(&candidate.pod.id().to_string(), &reason);
                }
                Err(err) => {
                    error!(pod = %candidate.pod.id(), error = %err, "eviction request failed");
                    self.metrics.inc_error(error_kinds::EVICTION);
                }
            }
        }

        stats
    }

    /// Keep autoscalers whose mode produces evictions, whose configuration
    /// the recommender accepts, and whose target selector resolves.
    async fn resolve_updatable(
        &self,
        autoscalers: Vec<VerticalPodAutoscaler>,
    ) -> Vec<(VerticalPodAutoscaler, LabelSelector)> {
        let mut active = Vec::new();
        for vpa in autoscalers {
            if !vpa.produces_evictions() {
                debug!(vpa = %vpa.id(), mode = ?vpa.update_mode(), "mode produces no evictions, skipping");
                continue;
            }
            if vpa.has_condition_true(CONDITION_CONFIG_UNSUPPORTED) {
                debug!(vpa = %vpa.id(), "configuration unsupported, skipping");
                continue;
            }
            match self.selector_fetcher.fetch_selector(&vpa).await {
                Ok(selector) => active.push((vpa, selector)),
                Err(err) => {
                    warn!(vpa = %vpa.id(), error = %err, "cannot resolve target selector, skipping");
                    self.metrics.inc_error(error_kinds::SELECTOR_FETCH);
                }
            }
        }
        active
    }

    /// Replica-floor accounting over the full live pod set, so floors see a
    /// workload's whole population, not only the autoscaled slice.
    async fn build_restriction(
        &self,
        live_pods: &[Pod],
    ) -> (EvictionRestriction, BTreeSet<PodId>) {
        let mut restriction =
            EvictionRestriction::new(self.config.min_replicas, self.config.eviction_tolerance);
        let mut unresolved = BTreeSet::new();
        for pod in live_pods {
            match self.controller_fetcher.topmost_workload(pod).await {
                Ok(Some(workload)) => restriction.register(pod, workload),
                Ok(None) => {}
                Err(err) => {
                    warn!(pod = %pod.id(), error = %err, "cannot resolve workload");
                    self.metrics.inc_error(error_kinds::WORKLOAD_FETCH);
                    unresolved.insert(pod.id());
                }
            }
        }
        (restriction, unresolved)
    }

    /// Per-tick LimitRange view; a failed listing degrades to uncapped for
    /// this tick only.
    async fn limit_range_calculator(&self) -> Arc<dyn LimitRangeCalculator> {
        if !self.config.limit_ranges_enabled {
            return Arc::new(NoopLimitsCalculator);
        }
        match self.gateway.list_limit_ranges(&self.config.namespace).await {
            Ok(objects) => Arc::new(LimitRangeSnapshot::from_objects(&objects)),
            Err(err) => {
                warn!(error = %err, "failed to list limit ranges, capping to policy only this tick");
                self.metrics.inc_error(error_kinds::LIMIT_RANGE_LIST);
                Arc::new(NoopLimitsCalculator)
            }
        }
    }
}

/// Assign each pod to the single autoscaler controlling it. When several
/// match, the lexicographically first autoscaler id wins.
fn group_by_controlling_vpa(
    live_pods: &[Pod],
    active: &[(VerticalPodAutoscaler, LabelSelector)],
) -> VpaControlledPods {
    let mut controlled = VpaControlledPods::new();
    for pod in live_pods {
        let owner = active
            .iter()
            .filter(|(vpa, selector)| {
                vpa.metadata.namespace == pod.metadata.namespace
                    && selector.matches(&pod.metadata.labels)
            })
            .map(|(vpa, _)| vpa.id())
            .min();
        if let Some(vpa_id) = owner {
            controlled.entry(vpa_id).or_default().push(pod.clone());
        }
    }
    controlled
}
