// Package liveness answers the controller's own liveness probe.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod error;
pub mod service;

pub use error::TimeoutIsTooShortError;
pub use service::Service;

const MIN_TIMEOUT: Duration = Duration::from_millis(1);
const FALLBACK_TIMEOUT: Duration = Duration::from_millis(10);

/// Liveness probe over a set of watched services.
pub struct Probe {
    services: RwLock<Vec<Arc<dyn Service>>>,
    timeout: Duration,
}

impl Probe {
    pub fn new(timeout: Duration) -> Self {
        let timeout = if timeout < MIN_TIMEOUT {
            warn!(
                error = %TimeoutIsTooShortError,
                "min timeout duration is 1ms (timeout set up as 10ms as a more reasonable value)"
            );
            FALLBACK_TIMEOUT
        } else {
            timeout
        };

        Self {
            services: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Replaces the set of services the probe answers for.
    pub fn watch(&self, services: Vec<Arc<dyn Service>>) {
        *self.services.write() = services;
    }

    /// Alive when every watched service is alive. Nothing watched is alive.
    pub fn is_alive(&self) -> bool {
        let services = self.services.read().clone();
        services.iter().all(|s| s.is_alive(self.timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
