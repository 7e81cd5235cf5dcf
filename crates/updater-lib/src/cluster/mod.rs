//! Cluster API access
//!
//! Every external call the pipeline makes goes through the traits here, so
//! the whole decision path can run against fakes. The HTTP implementation
//! lives in `http`; workload and selector resolution in `target`.

mod http;
mod target;

pub use http::{HttpClusterGateway, HttpGatewayConfig};
pub use target::{ControllerFetcher, TargetSelectorFetcher};

use crate::models::{Pod, PodId, VerticalPodAutoscaler};
use crate::recommendation::LimitRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of an eviction request.
///
/// The cluster API may refuse an eviction (disruption budget, pod already
/// gone); those refusals are expected operational outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionOutcome {
    Evicted,
    Rejected(String),
}

/// Liveness record maintained by the admission webhook.
#[derive(Debug, Clone, Default)]
pub struct AdmissionControllerStatus {
    pub holder_identity: String,
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Read and write access to the cluster objects the updater touches.
///
/// An empty namespace means all namespaces.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn list_autoscalers(&self, namespace: &str) -> anyhow::Result<Vec<VerticalPodAutoscaler>>;

    async fn list_pods(&self, namespace: &str) -> anyhow::Result<Vec<Pod>>;

    async fn list_limit_ranges(&self, namespace: &str) -> anyhow::Result<Vec<LimitRange>>;

    async fn admission_controller_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<AdmissionControllerStatus>>;

    /// Request eviction of a pod through the eviction subresource.
    async fn evict_pod(&self, pod: &PodId) -> anyhow::Result<EvictionOutcome>;
}
