// Flap suppression for probe results.

use crate::model::HealthStatus;

/// Turns a stream of raw probe results into a debounced health status.
///
/// The status only moves to Healthy after `healthy_threshold` consecutive
/// successes and to Unhealthy after `unhealthy_threshold` consecutive
/// failures. A result that agrees with the current status resets the opposite
/// streak.
#[derive(Debug, Clone)]
pub struct Debounce {
    status: HealthStatus,
    oks: u32,
    fails: u32,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
}

impl Debounce {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            status: HealthStatus::Unknown,
            oks: 0,
            fails: 0,
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Feeds one probe result and returns the resulting status.
    pub fn observe(&mut self, ok: bool) -> HealthStatus {
        if ok {
            self.fails = 0;
            if self.status == HealthStatus::Healthy {
                self.oks = 0;
            } else {
                self.oks += 1;
                if self.oks >= self.healthy_threshold {
                    self.status = HealthStatus::Healthy;
                    self.oks = 0;
                }
            }
        } else {
            self.oks = 0;
            if self.status == HealthStatus::Unhealthy {
                self.fails = 0;
            } else {
                self.fails += 1;
                if self.fails >= self.unhealthy_threshold {
                    self.status = HealthStatus::Unhealthy;
                    self.fails = 0;
                }
            }
        }
        self.status
    }
}
