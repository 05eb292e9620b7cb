//! Operator command surface shared by the HTTP API and the binary.
//!
//! Structural commands run on their own task and are awaited through the
//! join handle: a caller that goes away (client disconnect, request timeout)
//! stops waiting, but the operation itself still runs to a defined end state.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

use crate::backup::BackupScheduler;
use crate::error::{ControllerError, Result};
use crate::model::{BackupRecord, ServiceRecord};
use crate::registry::Registry;
use crate::rollout::RolloutManager;
use crate::scaler::Scaler;
use crate::startup::StartupSequencer;

/// Uniform reply of every operator command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    pub status: &'static str,
    pub result: serde_json::Value,
}

impl CommandResponse {
    fn new<T: Serialize>(ok: bool, status: &'static str, result: &T) -> Result<Self> {
        let result = serde_json::to_value(result).map_err(|e| ControllerError::Internal(e.to_string()))?;
        Ok(Self { ok, status, result })
    }
}

pub struct Commands {
    registry: Arc<Registry>,
    sequencer: Arc<StartupSequencer>,
    rollouts: Arc<RolloutManager>,
    scaler: Arc<Scaler>,
    backups: Arc<BackupScheduler>,
}

impl Commands {
    pub fn new(
        registry: Arc<Registry>,
        sequencer: Arc<StartupSequencer>,
        rollouts: Arc<RolloutManager>,
        scaler: Arc<Scaler>,
        backups: Arc<BackupScheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sequencer,
            rollouts,
            scaler,
            backups,
        })
    }

    pub async fn start(&self) -> Result<CommandResponse> {
        let sequencer = self.sequencer.clone();
        let report = detach(async move { Ok(sequencer.start().await) }).await?;
        let ready = report.is_ready();
        CommandResponse::new(ready, if ready { "ready" } else { "failed" }, &report)
    }

    pub async fn scale(&self, service: &str, to: usize) -> Result<CommandResponse> {
        let scaler = self.scaler.clone();
        let service = service.to_string();
        let result = detach(async move { scaler.scale(&service, to).await }).await?;
        CommandResponse::new(result.is_completed(), result.outcome.as_str(), &result)
    }

    pub async fn rollout(&self, service: &str, version: &str, batch: Option<usize>) -> Result<CommandResponse> {
        let rollouts = self.rollouts.clone();
        let service = service.to_string();
        let version = version.to_string();
        let result = detach(async move { rollouts.rollout(&service, &version, batch).await }).await?;
        CommandResponse::new(result.is_completed(), result.outcome.as_str(), &result)
    }

    pub async fn rollback(&self, service: &str) -> Result<CommandResponse> {
        let rollouts = self.rollouts.clone();
        let service = service.to_string();
        let result = detach(async move { rollouts.rollback(&service).await }).await?;
        CommandResponse::new(result.is_completed(), result.outcome.as_str(), &result)
    }

    /// Signals the in-flight rollout or scale of `service`.
    pub fn cancel(&self, service: &str) -> Result<CommandResponse> {
        let signalled = self.registry.cancel(service)?;
        let record = self.registry.snapshot(service)?;
        CommandResponse::new(
            signalled,
            if signalled { "cancelling" } else { "idle" },
            &record,
        )
    }

    /// Triggers a backup job now. Returns once the run is Pending.
    pub fn backup_now(&self, job: &str) -> Result<CommandResponse> {
        let (record, _run) = self.backups.run_now(job)?;
        CommandResponse::new(true, "pending", &record)
    }

    pub fn status(&self) -> Vec<ServiceRecord> {
        self.registry.snapshots()
    }

    pub fn status_of(&self, service: &str) -> Result<ServiceRecord> {
        self.registry.snapshot(service)
    }

    pub fn backups(&self) -> Vec<BackupRecord> {
        self.backups.records()
    }
}

async fn detach<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result,
        Err(e) => Err(ControllerError::Internal(format!("operation task failed: {e}"))),
    }
}
