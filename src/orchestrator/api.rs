// Package orchestrator provides the interface to the container runtime.

use serde::{Deserialize, Serialize};

/// Orchestrator-assigned replica identity.
pub type ReplicaId = String;

/// Raw readiness of one replica as the runtime sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaStatus {
    pub id: ReplicaId,
    pub version: String,
    pub ready: bool,
}

/// One-off job executed against a service (database snapshots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub target: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed(String),
}

/// Any failed infrastructure call. Callers never see the underlying cause type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("orchestrator {operation} on {target} failed: {message}")]
pub struct OrchestratorError {
    pub operation: &'static str,
    pub target: String,
    pub message: String,
}

impl OrchestratorError {
    pub fn new(operation: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Operations the controller needs from the container runtime.
///
/// `set_replicas`/`set_image_version` drive whole-service changes (startup);
/// `start_replica`/`stop_replica` drive the replica-granular steps of rollouts
/// and scaling.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync {
    /// Brings the service to exactly `count` replicas at its current image version.
    async fn set_replicas(&self, service: &str, count: usize) -> Result<(), OrchestratorError>;

    /// Sets the image version used for replicas created by `set_replicas`.
    async fn set_image_version(&self, service: &str, version: &str) -> Result<(), OrchestratorError>;

    /// Lists the service's replicas with their raw readiness.
    async fn get_replica_status(&self, service: &str) -> Result<Vec<ReplicaStatus>, OrchestratorError>;

    /// Starts one replica at `version`.
    async fn start_replica(&self, service: &str, version: &str) -> Result<ReplicaId, OrchestratorError>;

    /// Stops and removes one replica.
    async fn stop_replica(&self, service: &str, id: &str) -> Result<(), OrchestratorError>;

    /// Launches a job; completion is observed through `job_status`.
    async fn trigger_job(&self, spec: &JobSpec) -> Result<JobHandle, OrchestratorError>;

    /// Reports a job's state. A job that reached a terminal state is forgotten.
    async fn job_status(&self, handle: &JobHandle) -> Result<JobState, OrchestratorError>;

    /// Stops a job that is no longer awaited and forgets it.
    async fn cancel_job(&self, handle: &JobHandle) -> Result<(), OrchestratorError>;
}
