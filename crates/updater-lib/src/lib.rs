//! Updater library for vertical pod autoscaling
//!
//! This crate provides the core functionality for:
//! - Capping recommendations against policy and LimitRange bounds
//! - Computing and ranking per-pod update priorities
//! - Enforcing replica floors and a global eviction rate limit
//! - Gating evictions on admission-controller liveness
//! - The periodic updater loop composing all of the above
//! - Health checks and observability

pub mod clock;
pub mod cluster;
pub mod eviction;
pub mod health;
pub mod models;
pub mod observability;
pub mod priority;
pub mod recommendation;
pub mod status;
pub mod updater;

#[cfg(test)]
pub(crate) mod test_support;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use observability::{EvictionLogger, UpdaterMetrics};
pub use updater::{TickStats, UpdaterLoop, UpdaterLoopConfig};
