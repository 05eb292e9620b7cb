//! Health probing with debounce.

pub mod debounce;
pub mod prober;


pub use debounce::Debounce;
pub use prober::Prober;

use std::time::Duration;

/// Resolved health-check parameters for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub interval: Duration,
    /// Upper bound for one orchestrator status call.
    pub timeout: Duration,
    /// Consecutive successes needed to become Healthy.
    pub healthy_threshold: u32,
    /// Consecutive failures needed to become Unhealthy.
    pub unhealthy_threshold: u32,
}
