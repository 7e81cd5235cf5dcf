//! Vertical pod autoscaler updater
//!
//! This binary runs the eviction control loop: it periodically matches
//! recommender output against running pods and evicts the ones that should
//! restart with new resource requests.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use updater_lib::clock::system_clock;
use updater_lib::cluster::{ClusterGateway, HttpClusterGateway, HttpGatewayConfig};
use updater_lib::health::components;
use updater_lib::priority::{
    DefaultPriorityProcessor, NoopEvictionAdmission, PodEvictionAdmission,
    SequentialEvictionAdmission,
};
use updater_lib::status::AdmissionStatusGate;
use updater_lib::{EvictionLogger, HealthRegistry, UpdaterLoop, UpdaterMetrics};

mod api;
mod config;

const UPDATER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting vertical autoscaler updater");

    let config = config::UpdaterConfig::parse();
    info!(
        interval_secs = config.updater_interval,
        namespace = %config.vpa_object_namespace,
        "Updater configured"
    );

    let clock = system_clock();

    // A cluster we cannot reach at startup is fatal; once the loop is
    // running, failures degrade instead of exiting.
    let token = config.read_token()?;
    let gateway = Arc::new(
        HttpClusterGateway::new(HttpGatewayConfig {
            base_url: config.cluster_api_url.clone(),
            token,
            request_timeout: std::time::Duration::from_secs(30),
        })
        .context("building cluster API gateway")?,
    );

    gateway
        .probe(&config.vpa_object_namespace)
        .await
        .context("cluster API unreachable")?;

    // Probe LimitRange support once; when unavailable, cap to policy only
    // for the lifetime of the process.
    let limit_ranges_enabled = match gateway
        .list_limit_ranges(&config.vpa_object_namespace)
        .await
    {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "LimitRange listing unavailable, falling back to not checking limits");
            false
        }
    };

    let health = HealthRegistry::new(
        ChronoDuration::seconds(config.updater_interval as i64 * 5),
        clock.clone(),
    );
    health.register(components::UPDATER_LOOP).await;
    health.register(components::CLUSTER_GATEWAY).await;
    health.register(components::STATUS_GATE).await;

    // Register the metric families before the first scrape.
    UpdaterMetrics::new();

    let logger = EvictionLogger::new("updater");
    logger.log_startup(UPDATER_VERSION);

    let status_gate = AdmissionStatusGate::new(
        config.use_admission_controller_status,
        config.admission_controller_status_namespace.clone(),
        config.admission_controller_status_name.clone(),
        ChronoDuration::seconds(config.admission_controller_status_timeout as i64),
        gateway.clone(),
        clock.clone(),
    );

    // The default chain admits everything; site-specific gates slot in here.
    let default_admission: Arc<dyn PodEvictionAdmission> = Arc::new(NoopEvictionAdmission);
    let admission = Arc::new(SequentialEvictionAdmission::new(vec![default_admission]));

    let updater = UpdaterLoop::new(
        config.loop_config(limit_ranges_enabled),
        gateway.clone(),
        gateway.clone(),
        gateway.clone(),
        admission,
        status_gate,
        Arc::new(DefaultPriorityProcessor),
        clock,
        health.clone(),
    );

    // Start health and metrics server
    let _api_server = tokio::spawn(api::serve(config.api_port, health.clone()));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let loop_handle = tokio::spawn(updater.run(shutdown_tx.subscribe()));

    health.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    let _ = loop_handle.await;

    Ok(())
}
