//! Updater configuration
//!
//! Flags with environment fallback; every knob of the eviction pipeline is
//! settable here.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use updater_lib::priority::UpdateConfig;
use updater_lib::status::{DEFAULT_STATUS_NAME, DEFAULT_STATUS_NAMESPACE};
use updater_lib::UpdaterLoopConfig;

const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Updater decides which pods should be restarted based on the resource
/// recommendations calculated by the recommender.
#[derive(Debug, Parser)]
#[command(name = "updater", version, about, long_about = None)]
pub struct UpdaterConfig {
    /// How often the updater runs, in seconds; also each tick's deadline
    #[arg(long, env = "UPDATER_INTERVAL", default_value_t = 60)]
    pub updater_interval: u64,

    /// Minimum number of replicas to perform update
    #[arg(long, env = "UPDATER_MIN_REPLICAS", default_value_t = 2)]
    pub min_replicas: u32,

    /// Fraction of replica count that can be evicted for update
    #[arg(long, env = "UPDATER_EVICTION_TOLERANCE", default_value_t = 0.5)]
    pub eviction_tolerance: f64,

    /// Number of pods that can be evicted per second; 0 or -1 disables the
    /// rate limiter
    #[arg(long, env = "UPDATER_EVICTION_RATE_LIMIT", default_value_t = -1.0)]
    pub eviction_rate_limit: f64,

    /// Burst of pods that can be evicted
    #[arg(long, env = "UPDATER_EVICTION_RATE_BURST", default_value_t = 1)]
    pub eviction_rate_burst: u32,

    /// Minimum resource diff that makes a long-lived in-range pod updatable
    #[arg(long, env = "UPDATER_MIN_CHANGE_PRIORITY", default_value_t = 0.1)]
    pub min_change_priority: f64,

    /// Only evict pods while the admission controller status lease is live
    #[arg(
        long,
        env = "UPDATER_USE_ADMISSION_CONTROLLER_STATUS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub use_admission_controller_status: bool,

    /// Namespace of the admission controller status lease
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_STATUS_NAMESPACE)]
    pub admission_controller_status_namespace: String,

    /// Name of the admission controller status lease
    #[arg(long, default_value = DEFAULT_STATUS_NAME)]
    pub admission_controller_status_name: String,

    /// Seconds after which an unrenewed status lease counts as dead
    #[arg(long, default_value_t = 60)]
    pub admission_controller_status_timeout: u64,

    /// Namespace to search for autoscaler objects; empty means all
    #[arg(long, env = "UPDATER_VPA_OBJECT_NAMESPACE", default_value = "")]
    pub vpa_object_namespace: String,

    /// Port for health checks and Prometheus metrics
    #[arg(long, env = "UPDATER_API_PORT", default_value_t = 8943)]
    pub api_port: u16,

    /// Cluster API server base URL
    #[arg(
        long,
        env = "UPDATER_CLUSTER_API_URL",
        default_value = "https://kubernetes.default.svc"
    )]
    pub cluster_api_url: String,

    /// Bearer token file for the cluster API; missing file means anonymous
    #[arg(long, env = "UPDATER_TOKEN_FILE", default_value = DEFAULT_TOKEN_FILE)]
    pub token_file: String,
}

impl UpdaterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.updater_interval)
    }

    /// Read the service account token if one is mounted.
    pub fn read_token(&self) -> Result<String> {
        match std::fs::read_to_string(&self.token_file) {
            Ok(token) => Ok(token.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => {
                Err(err).with_context(|| format!("reading token file {}", self.token_file))
            }
        }
    }

    pub fn loop_config(&self, limit_ranges_enabled: bool) -> UpdaterLoopConfig {
        UpdaterLoopConfig {
            interval: self.interval(),
            namespace: self.vpa_object_namespace.clone(),
            min_replicas: self.min_replicas,
            eviction_tolerance: self.eviction_tolerance,
            eviction_rate_limit: self.eviction_rate_limit,
            eviction_rate_burst: self.eviction_rate_burst,
            update_config: UpdateConfig::with_min_change_priority(self.min_change_priority),
            limit_ranges_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_flag_table() {
        let config = UpdaterConfig::parse_from(["updater"]);
        assert_eq!(config.updater_interval, 60);
        assert_eq!(config.min_replicas, 2);
        assert_eq!(config.eviction_tolerance, 0.5);
        assert_eq!(config.eviction_rate_limit, -1.0);
        assert_eq!(config.eviction_rate_burst, 1);
        assert!(config.use_admission_controller_status);
        assert_eq!(config.vpa_object_namespace, "");
        assert_eq!(config.api_port, 8943);
    }

    #[test]
    fn boolean_flag_accepts_explicit_value() {
        let config =
            UpdaterConfig::parse_from(["updater", "--use-admission-controller-status", "false"]);
        assert!(!config.use_admission_controller_status);
    }

    #[test]
    fn loop_config_carries_the_flags() {
        let config = UpdaterConfig::parse_from([
            "updater",
            "--updater-interval",
            "30",
            "--min-replicas",
            "3",
            "--vpa-object-namespace",
            "prod",
        ]);
        let loop_config = config.loop_config(true);
        assert_eq!(loop_config.interval, Duration::from_secs(30));
        assert_eq!(loop_config.min_replicas, 3);
        assert_eq!(loop_config.namespace, "prod");
        assert!(loop_config.limit_ranges_enabled);
    }
}
