//! Admission-controller liveness gate
//!
//! Evicting pods while the admission webhook is down is pure churn: the
//! replacement pods would come back with unchanged requests. The webhook
//! maintains a lease as a heartbeat; this gate refuses all evictions unless
//! that lease is fresh and held.

use crate::clock::Clock;
use crate::cluster::ClusterGateway;
use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tracing::warn;

/// Default coordinates of the webhook's status lease.
pub const DEFAULT_STATUS_NAMESPACE: &str = "kube-system";
pub const DEFAULT_STATUS_NAME: &str = "vpa-admission-controller";

/// The webhook renews its lease every ten seconds; a lease older than the
/// timeout below is considered dead, with generous slack over the renewal
/// interval.
pub const STATUS_UPDATE_INTERVAL_SECS: i64 = 10;
pub const DEFAULT_STATUS_TIMEOUT_SECS: i64 = 60;

/// Decision produced by the gate each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Open,
    Closed(String),
}

impl GateState {
    pub fn is_open(&self) -> bool {
        matches!(self, GateState::Open)
    }
}

pub struct AdmissionStatusGate {
    enabled: bool,
    namespace: String,
    name: String,
    status_timeout: Duration,
    gateway: Arc<dyn ClusterGateway>,
    clock: Arc<dyn Clock>,
}

impl AdmissionStatusGate {
    pub fn new(
        enabled: bool,
        namespace: impl Into<String>,
        name: impl Into<String>,
        status_timeout: Duration,
        gateway: Arc<dyn ClusterGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enabled,
            namespace: namespace.into(),
            name: name.into(),
            status_timeout,
            gateway,
            clock,
        }
    }

    /// Whether evictions may proceed this tick.
    ///
    /// A read failure propagates; the caller treats it like a closed gate
    /// and records the error.
    pub async fn check(&self) -> Result<GateState> {
        if !self.enabled {
            return Ok(GateState::Open);
        }

        let status = self
            .gateway
            .admission_controller_status(&self.namespace, &self.name)
            .await?;
        let Some(status) = status else {
            return Ok(GateState::Closed(format!(
                "status lease {}/{} not found",
                self.namespace, self.name
            )));
        };
        if status.holder_identity.is_empty() {
            return Ok(GateState::Closed("status lease has no holder".to_string()));
        }
        let Some(last_update) = status.last_update_time else {
            return Ok(GateState::Closed(
                "status lease was never renewed".to_string(),
            ));
        };
        let age = self.clock.now() - last_update;
        if age > self.status_timeout {
            warn!(
                holder = %status.holder_identity,
                age_secs = age.num_seconds(),
                "admission controller status lease is stale"
            );
            return Ok(GateState::Closed(format!(
                "status lease stale for {}s",
                age.num_seconds()
            )));
        }
        Ok(GateState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{base_time, FakeCluster};

    fn gate(enabled: bool, cluster: Arc<FakeCluster>, clock: Arc<ManualClock>) -> AdmissionStatusGate {
        AdmissionStatusGate::new(
            enabled,
            DEFAULT_STATUS_NAMESPACE,
            DEFAULT_STATUS_NAME,
            Duration::seconds(DEFAULT_STATUS_TIMEOUT_SECS),
            cluster,
            clock,
        )
    }

    #[tokio::test]
    async fn disabled_gate_is_always_open() {
        let cluster = Arc::new(FakeCluster::new());
        let clock = Arc::new(ManualClock::new(base_time()));
        let gate = gate(false, cluster, clock);
        assert!(gate.check().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn missing_lease_closes_the_gate() {
        let cluster = Arc::new(FakeCluster::new());
        let clock = Arc::new(ManualClock::new(base_time()));
        let gate = gate(true, cluster, clock);
        assert!(!gate.check().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn fresh_lease_opens_the_gate() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_admission_status("webhook-1", Some(base_time()));
        let clock = Arc::new(ManualClock::new(base_time() + Duration::seconds(30)));
        let gate = gate(true, cluster, clock);
        assert!(gate.check().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn stale_lease_closes_the_gate() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_admission_status("webhook-1", Some(base_time()));
        let clock = Arc::new(ManualClock::new(base_time() + Duration::seconds(120)));
        let gate = gate(true, cluster, clock);
        let state = gate.check().await.unwrap();
        assert!(matches!(state, GateState::Closed(reason) if reason.contains("stale")));
    }

    #[tokio::test]
    async fn released_lease_closes_the_gate() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_admission_status("", Some(base_time()));
        let clock = Arc::new(ManualClock::new(base_time()));
        let gate = gate(true, cluster, clock);
        assert!(!gate.check().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn read_failure_propagates() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_status_reads();
        let clock = Arc::new(ManualClock::new(base_time()));
        let gate = gate(true, cluster, clock);
        assert!(gate.check().await.is_err());
    }
}
