// Controller events published by the registry and the backup scheduler.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{BackupOutcome, HealthStatus, RolloutState, StartupPhase};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    HealthChanged {
        service: String,
        from: HealthStatus,
        to: HealthStatus,
    },
    StartupChanged {
        service: String,
        phase: StartupPhase,
    },
    RolloutChanged {
        service: String,
        from: RolloutState,
        to: RolloutState,
    },
    ReplicaAdded {
        service: String,
        replica: String,
        version: String,
    },
    ReplicaRemoved {
        service: String,
        replica: String,
    },
    BackupFinished {
        job: String,
        outcome: BackupOutcome,
    },
}

/// Writes every controller event to the log until shutdown.
pub async fn log_events(shutdown: CancellationToken, mut rx: broadcast::Receiver<ControllerEvent>) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            ev = rx.recv() => match ev {
                Ok(ev) => log_event(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(component = "events", event = "lagged", skipped = skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

fn log_event(ev: &ControllerEvent) {
    match ev {
        ControllerEvent::HealthChanged { service, from, to } => {
            if *to == HealthStatus::Unhealthy {
                warn!(component = "events", event = "health_changed", service = %service, from = from.as_str(), to = to.as_str(), "service health changed");
            } else {
                info!(component = "events", event = "health_changed", service = %service, from = from.as_str(), to = to.as_str(), "service health changed");
            }
        }
        ControllerEvent::StartupChanged { service, phase } => {
            info!(component = "events", event = "startup_changed", service = %service, phase = phase.as_str(), "startup phase changed");
        }
        ControllerEvent::RolloutChanged { service, from, to } => {
            info!(component = "events", event = "rollout_changed", service = %service, from = from.as_str(), to = to.as_str(), "rollout state changed");
        }
        ControllerEvent::ReplicaAdded { service, replica, version } => {
            info!(component = "events", event = "replica_added", service = %service, replica = %replica, version = %version, "replica added");
        }
        ControllerEvent::ReplicaRemoved { service, replica } => {
            info!(component = "events", event = "replica_removed", service = %service, replica = %replica, "replica removed");
        }
        ControllerEvent::BackupFinished { job, outcome } => {
            info!(component = "events", event = "backup_finished", job = %job, outcome = outcome.as_str(), "backup finished");
        }
    }
}
