// Service and replica state as tracked by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::ReplicaId;

/// Debounced binary health as reported by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Rollout state of a service. Stable unless a rollout is in progress or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    #[default]
    Stable,
    RollingOut,
    RollingBack,
    Failed,
}

impl RolloutState {
    pub fn as_str(self) -> &'static str {
        match self {
            RolloutState::Stable => "stable",
            RolloutState::RollingOut => "rolling_out",
            RolloutState::RollingBack => "rolling_back",
            RolloutState::Failed => "failed",
        }
    }
}

/// Per-service startup state machine.
///
/// `Pending -> Starting -> WaitingHealthy -> Ready`, or `-> Failed`.
/// `Blocked` marks a service never attempted because a dependency failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPhase {
    #[default]
    Pending,
    Starting,
    WaitingHealthy,
    Ready,
    Failed,
    Blocked,
}

impl StartupPhase {
    /// Phases from which the sequencer will not move the service any further.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StartupPhase::Ready | StartupPhase::Failed | StartupPhase::Blocked
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StartupPhase::Pending => "pending",
            StartupPhase::Starting => "starting",
            StartupPhase::WaitingHealthy => "waiting_healthy",
            StartupPhase::Ready => "ready",
            StartupPhase::Failed => "failed",
            StartupPhase::Blocked => "blocked",
        }
    }
}

/// One running instance of a service's workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replica {
    pub id: ReplicaId,
    pub version: String,
    pub health: HealthStatus,
    /// Creation order across the whole controller; higher is newer.
    pub seq: u64,
}

/// Point-in-time state of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceRecord {
    pub name: String,
    pub depends_on: Vec<String>,
    pub desired_replicas: usize,
    pub replicas: Vec<Replica>,
    pub health: HealthStatus,
    pub rollout: RolloutState,
    pub startup: StartupPhase,
    /// Current stable version.
    pub version: String,
    /// Stable version before the last successful rollout.
    pub previous_version: Option<String>,
    /// Structural operation currently holding the service, if any.
    pub operation: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn new(name: String, depends_on: Vec<String>, desired_replicas: usize, version: String) -> Self {
        Self {
            name,
            depends_on,
            desired_replicas,
            replicas: Vec::new(),
            health: HealthStatus::Unknown,
            rollout: RolloutState::Stable,
            startup: StartupPhase::Pending,
            version,
            previous_version: None,
            operation: None,
            updated_at: Utc::now(),
        }
    }

    pub fn current_replicas(&self) -> usize {
        self.replicas.len()
    }

    pub fn healthy_replicas(&self) -> usize {
        self.replicas
            .iter()
            .filter(|r| r.health == HealthStatus::Healthy)
            .count()
    }

    pub fn replica(&self, id: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.id == id)
    }

    pub fn is_replica_healthy(&self, id: &str) -> bool {
        self.replica(id)
            .map(|r| r.health == HealthStatus::Healthy)
            .unwrap_or(false)
    }

    /// Count of replicas running the given version.
    pub fn replicas_at(&self, version: &str) -> usize {
        self.replicas.iter().filter(|r| r.version == version).count()
    }
}
