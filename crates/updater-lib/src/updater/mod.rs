//! The updater control loop
//!
//! Composes recommendation capping, priority ranking, admission, replica
//! floors, rate limiting and the status gate into one tick, and drives that
//! tick on a fixed period.

mod r#loop;

pub use r#loop::{TickStats, UpdaterLoop, UpdaterLoopConfig};
