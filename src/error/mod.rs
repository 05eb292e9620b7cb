//! Error kinds returned at every controller operation boundary.

use std::time::Duration;

use crate::orchestrator::OrchestratorError;

fn pretty(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

/// Result alias used by controller components.
pub type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("{operation} of {service} timed out after {}", pretty(.after))]
    Timeout {
        service: String,
        operation: &'static str,
        after: Duration,
    },

    #[error("cannot scale {service} to {requested}: allowed range is [{min}, {max}]")]
    Bounds {
        service: String,
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("unknown service {0}")]
    UnknownService(String),

    #[error("unknown backup job {0}")]
    UnknownJob(String),

    #[error("{service} is busy: {operation} in progress")]
    Busy { service: String, operation: String },

    #[error("cannot scale {service} below 1 while running services depend on it: {}", .dependents.join(", "))]
    DependencyGuard {
        service: String,
        dependents: Vec<String>,
    },

    #[error("cannot scale {service} up while services it depends on are stopped: {}", .dependencies.join(", "))]
    DependencyDown {
        service: String,
        dependencies: Vec<String>,
    },

    #[error("{0} has no previous stable version to roll back to")]
    NoPreviousVersion(String),

    #[error("backup job {0} is already pending")]
    JobAlreadyPending(String),

    #[error("operation on {0} was cancelled")]
    Cancelled(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Short machine-readable kind, used in API payloads and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::Cycle { .. } => "cycle",
            ControllerError::Timeout { .. } => "timeout",
            ControllerError::Bounds { .. } => "bounds",
            ControllerError::Orchestrator(_) => "orchestrator",
            ControllerError::UnknownService(_) => "unknown_service",
            ControllerError::UnknownJob(_) => "unknown_job",
            ControllerError::Busy { .. } => "busy",
            ControllerError::DependencyGuard { .. } => "dependency_guard",
            ControllerError::DependencyDown { .. } => "dependency_down",
            ControllerError::NoPreviousVersion(_) => "no_previous_version",
            ControllerError::JobAlreadyPending(_) => "job_pending",
            ControllerError::Cancelled(_) => "cancelled",
            ControllerError::InvalidRequest(_) => "invalid_request",
            ControllerError::Config(_) => "config",
            ControllerError::Internal(_) => "internal",
        }
    }

    /// Whether the request was refused before any state changed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ControllerError::Bounds { .. }
                | ControllerError::Busy { .. }
                | ControllerError::DependencyGuard { .. }
                | ControllerError::DependencyDown { .. }
                | ControllerError::NoPreviousVersion(_)
                | ControllerError::JobAlreadyPending(_)
                | ControllerError::UnknownService(_)
                | ControllerError::UnknownJob(_)
                | ControllerError::InvalidRequest(_)
        )
    }
}
