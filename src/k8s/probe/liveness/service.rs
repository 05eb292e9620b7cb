// Service trait for liveness checking

use std::time::Duration;

/// Something the liveness probe can ask whether it is still working.
pub trait Service: Send + Sync {
    /// Must answer without blocking for longer than `timeout`.
    fn is_alive(&self, timeout: Duration) -> bool;
}
