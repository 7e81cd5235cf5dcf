//! Observability infrastructure for the updater
//!
//! Provides:
//! - Prometheus metrics (eviction counts, typed error counters, tick latency)
//! - Structured JSON logging of eviction decisions with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick duration (in seconds); ticks run every minute
/// by default, so the tail bucket sits at the deadline.
const TICK_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 15.0, 30.0, 60.0];

/// Error classes counted by `updater_errors_total`.
pub mod error_kinds {
    pub const VPA_LIST: &str = "vpa_list";
    pub const POD_LIST: &str = "pod_list";
    pub const SELECTOR_FETCH: &str = "selector_fetch";
    pub const WORKLOAD_FETCH: &str = "workload_fetch";
    pub const LIMIT_RANGE_LIST: &str = "limit_range_list";
    pub const STATUS_READ: &str = "status_read";
    pub const EVICTION: &str = "eviction";
}

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<UpdaterMetricsInner> = OnceLock::new();

struct UpdaterMetricsInner {
    evictions_total: IntCounter,
    evictions_rejected_total: IntCounter,
    errors_total: IntCounterVec,
    candidate_pods: IntGauge,
    controlled_pods: IntGauge,
    vpas_processed: IntGauge,
    status_gate_open: IntGauge,
    ticks_total: IntCounter,
    ticks_overrun_total: IntCounter,
    tick_duration_seconds: Histogram,
}

impl UpdaterMetricsInner {
    fn new() -> Self {
        Self {
            evictions_total: register_int_counter!(
                "updater_evictions_total",
                "Pods evicted to pick up a new recommendation"
            )
            .expect("Failed to register evictions_total"),

            evictions_rejected_total: register_int_counter!(
                "updater_evictions_rejected_total",
                "Evictions the API server refused (disruption budget, races)"
            )
            .expect("Failed to register evictions_rejected_total"),

            errors_total: register_int_counter_vec!(
                "updater_errors_total",
                "Errors by kind; none of these abort a tick",
                &["kind"]
            )
            .expect("Failed to register errors_total"),

            candidate_pods: register_int_gauge!(
                "updater_candidate_pods",
                "Eviction candidates found in the last tick"
            )
            .expect("Failed to register candidate_pods"),

            controlled_pods: register_int_gauge!(
                "updater_controlled_pods",
                "Live pods matched to an autoscaler in the last tick"
            )
            .expect("Failed to register controlled_pods"),

            vpas_processed: register_int_gauge!(
                "updater_vpas_processed",
                "Autoscalers in an eviction-producing mode in the last tick"
            )
            .expect("Failed to register vpas_processed"),

            status_gate_open: register_int_gauge!(
                "updater_admission_status_gate_open",
                "1 when the admission controller status gate permits evictions"
            )
            .expect("Failed to register status_gate_open"),

            ticks_total: register_int_counter!(
                "updater_ticks_total",
                "Completed updater loop iterations"
            )
            .expect("Failed to register ticks_total"),

            ticks_overrun_total: register_int_counter!(
                "updater_ticks_overrun_total",
                "Ticks cancelled at their deadline"
            )
            .expect("Failed to register ticks_overrun_total"),

            tick_duration_seconds: register_histogram!(
                "updater_tick_duration_seconds",
                "Wall time of one updater loop iteration",
                TICK_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),
        }
    }
}

/// Updater metrics for Prometheus exposition.
///
/// A lightweight handle to the global registry; clones share state.
#[derive(Clone)]
pub struct UpdaterMetrics {
    _private: (),
}

impl Default for UpdaterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdaterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(UpdaterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &UpdaterMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_evictions(&self) {
        self.inner().evictions_total.inc();
    }

    pub fn inc_evictions_rejected(&self) {
        self.inner().evictions_rejected_total.inc();
    }

    pub fn inc_error(&self, kind: &str) {
        self.inner().errors_total.with_label_values(&[kind]).inc();
    }

    pub fn set_candidate_pods(&self, count: i64) {
        self.inner().candidate_pods.set(count);
    }

    pub fn set_controlled_pods(&self, count: i64) {
        self.inner().controlled_pods.set(count);
    }

    pub fn set_vpas_processed(&self, count: i64) {
        self.inner().vpas_processed.set(count);
    }

    pub fn set_status_gate_open(&self, open: bool) {
        self.inner().status_gate_open.set(i64::from(open));
    }

    pub fn observe_tick(&self, duration_secs: f64) {
        self.inner().ticks_total.inc();
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn inc_tick_overrun(&self) {
        self.inner().ticks_overrun_total.inc();
    }
}

/// Structured logger for eviction pipeline events.
#[derive(Clone)]
pub struct EvictionLogger {
    instance: String,
}

impl EvictionLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_eviction(
        &self,
        pod: &str,
        vpa: &str,
        resource_diff: f64,
        scale_up: bool,
        outside_range: bool,
    ) {
        info!(
            event = "pod_evicted",
            instance = %self.instance,
            pod = %pod,
            vpa = %vpa,
            resource_diff = resource_diff,
            scale_up = scale_up,
            outside_recommended_range = outside_range,
            "Evicted pod to apply new resource recommendation"
        );
    }

    pub fn log_eviction_rejected(&self, pod: &str, reason: &str) {
        info!(
            event = "eviction_rejected",
            instance = %self.instance,
            pod = %pod,
            reason = %reason,
            "API server refused eviction, will retry in a later tick"
        );
    }

    pub fn log_gate_closed(&self, reason: &str) {
        warn!(
            event = "status_gate_closed",
            instance = %self.instance,
            reason = %reason,
            "Admission controller not live, skipping evictions this tick"
        );
    }

    pub fn log_tick_summary(
        &self,
        vpas: usize,
        controlled_pods: usize,
        candidates: usize,
        evictions: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "tick_complete",
            instance = %self.instance,
            vpas = vpas,
            controlled_pods = controlled_pods,
            candidates = candidates,
            evictions = evictions,
            elapsed_ms = elapsed_ms,
            "Updater tick complete"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "updater_started",
            instance = %self.instance,
            version = %version,
            "Updater started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "updater_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Updater shutting down"
        );
    }
}
