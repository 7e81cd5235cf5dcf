//! Global eviction rate limiting
//!
//! A token bucket shared by all workloads in the process. Tokens accrue in
//! real time against the injected clock; the bucket level is the only state
//! that survives between ticks.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub struct EvictionRateLimiter {
    /// Tokens per second; zero or negative disables limiting entirely.
    rate: f64,
    /// Bucket capacity.
    burst: u32,
    tokens: f64,
    last_refill: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl EvictionRateLimiter {
    pub fn new(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            rate,
            burst,
            // A fresh limiter starts with a full bucket.
            tokens: f64::from(burst),
            last_refill: now,
            clock,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.rate <= 0.0
    }

    /// Take one token if available. Never blocks: a saturated bucket means
    /// the caller drops the rest of this tick's candidates.
    pub fn try_evict(&mut self) -> bool {
        if self.is_disabled() {
            return true;
        }
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            debug!(tokens = self.tokens, "eviction rate limit reached");
            false
        }
    }

    fn refill(&mut self) {
        let now = self.clock.now();
        let elapsed = (now - self.last_refill)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(f64::from(self.burst));
    }
}
