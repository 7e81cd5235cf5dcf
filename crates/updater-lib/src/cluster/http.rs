//! HTTP implementation of the cluster gateway
//!
//! Talks to the cluster API server over REST with a bearer token. Evictions
//! go through the pod `eviction` subresource; a 429 (disruption budget) or
//! 404 (lost race) response is a rejection, not an error.

use super::{AdmissionControllerStatus, ClusterGateway, EvictionOutcome};
use crate::models::{Pod, PodId, VerticalPodAutoscaler};
use crate::recommendation::LimitRange;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for the cluster API.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// API server base URL, e.g. "https://kubernetes.default.svc".
    pub base_url: String,
    /// Bearer token; empty for anonymous access (local development).
    pub token: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://kubernetes.default.svc".to_string(),
            token: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// List envelope returned by the API server.
#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Lease object carrying the admission controller's heartbeat.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Lease {
    spec: LeaseSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LeaseSpec {
    holder_identity: Option<String>,
    renew_time: Option<DateTime<Utc>>,
}

pub struct HttpClusterGateway {
    config: HttpGatewayConfig,
    client: reqwest::Client,
}

impl HttpClusterGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("building cluster API client")?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Namespaced or cluster-wide collection path.
    fn collection_path(prefix: &str, namespace: &str, plural: &str) -> String {
        if namespace.is_empty() {
            format!("{prefix}/{plural}")
        } else {
            format!("{prefix}/namespaces/{namespace}/{plural}")
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, self.url(path));
        if !self.config.token.is_empty() {
            builder = builder.bearer_auth(&self.config.token);
        }
        builder
    }

    async fn list<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?
            .error_for_status()
            .with_context(|| format!("GET {path}"))?;
        let list: ObjectList<T> = response
            .json()
            .await
            .with_context(|| format!("decoding {path}"))?;
        Ok(list.items)
    }

    pub(super) async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .with_context(|| format!("GET {path}"))?;
        Ok(Some(
            response
                .json()
                .await
                .with_context(|| format!("decoding {path}"))?,
        ))
    }
}

/// Wire body for the eviction subresource.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Eviction {
    api_version: &'static str,
    kind: &'static str,
    metadata: EvictionTarget,
}

#[derive(Debug, Serialize)]
struct EvictionTarget {
    name: String,
    namespace: String,
}

#[async_trait]
impl ClusterGateway for HttpClusterGateway {
    async fn list_autoscalers(&self, namespace: &str) -> Result<Vec<VerticalPodAutoscaler>> {
        let path = Self::collection_path(
            "/apis/autoscaling.k8s.io/v1",
            namespace,
            "verticalpodautoscalers",
        );
        self.list(&path).await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let path = Self::collection_path("/api/v1", namespace, "pods");
        self.list(&path).await
    }

    async fn list_limit_ranges(&self, namespace: &str) -> Result<Vec<LimitRange>> {
        let path = Self::collection_path("/api/v1", namespace, "limitranges");
        self.list(&path).await
    }

    async fn admission_controller_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AdmissionControllerStatus>> {
        let path = format!("/apis/coordination.k8s.io/v1/namespaces/{namespace}/leases/{name}");
        let lease: Option<Lease> = self.get_json(&path).await?;
        Ok(lease.map(|lease| AdmissionControllerStatus {
            holder_identity: lease.spec.holder_identity.unwrap_or_default(),
            last_update_time: lease.spec.renew_time,
        }))
    }

    async fn evict_pod(&self, pod: &PodId) -> Result<EvictionOutcome> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}/eviction",
            pod.namespace, pod.name
        );
        let body = Eviction {
            api_version: "policy/v1",
            kind: "Eviction",
            metadata: EvictionTarget {
                name: pod.name.clone(),
                namespace: pod.namespace.clone(),
            },
        };
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(EvictionOutcome::Evicted);
        }
        // Disruption budgets answer 429; a pod deleted underneath us answers
        // 404. Both mean "not this time", and the next tick sees fresh
        // state.
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::NOT_FOUND {
            let detail = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());
            debug!(pod = %pod, status = %status, "eviction rejected by API server");
            return Ok(EvictionOutcome::Rejected(detail));
        }
        bail!("eviction of {pod} failed with status {status}");
    }
}

impl HttpClusterGateway {
    /// Connectivity probe used at startup: listing in the configured scope
    /// must at least reach the server.
    pub async fn probe(&self, namespace: &str) -> Result<()> {
        let _ = self.list_pods(namespace).await?;
        Ok(())
    }
}
