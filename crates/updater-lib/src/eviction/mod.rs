//! Eviction throttling
//!
//! Two independent brakes on the updater's actuation: per-workload replica
//! floors and a process-global token bucket.

mod rate_limiter;
mod restriction;

pub use rate_limiter::EvictionRateLimiter;
pub use restriction::{EvictionRestriction, WorkloadKey};
