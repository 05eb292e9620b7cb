//! Orchestrator boundary: the injected interface the controller drives, plus adapters.

pub mod api;
pub mod docker;
pub mod memory;

pub use api::{
    JobHandle, JobSpec, JobState, Orchestrator, OrchestratorError, ReplicaId, ReplicaStatus,
};
pub use docker::DockerOrchestrator;
pub use memory::MemoryOrchestrator;
