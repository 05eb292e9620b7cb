// Rollout manager: replaces replicas batch by batch, reverting on failure.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::RolloutPlan;
use crate::config::{Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::model::{HealthStatus, RolloutState};
use crate::orchestrator::{Orchestrator, ReplicaId};
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutOutcome {
    Completed,
    /// The rollout failed and the previous version was restored.
    RolledBack { reason: String },
    /// The rollout failed and the revert could not restore a healthy service.
    RollbackFailed { reason: String },
}

impl RolloutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutOutcome::Completed => "completed",
            RolloutOutcome::RolledBack { .. } => "rolled_back",
            RolloutOutcome::RollbackFailed { .. } => "rollback_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RolloutResult {
    pub service: String,
    pub from_version: String,
    pub to_version: String,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub outcome: RolloutOutcome,
}

impl RolloutResult {
    pub fn is_completed(&self) -> bool {
        self.outcome == RolloutOutcome::Completed
    }
}

/// Performs rollouts and operator rollbacks.
///
/// A batch stops its old replicas, starts the same number at the new
/// version and waits for all of them to be Healthy. When no replica outside
/// the batch is healthy, replacements are started first and the batch is
/// stopped only after they pass, so the service always keeps a healthy
/// replica. Any failure reverts to the version the rollout started from.
pub struct RolloutManager {
    registry: Arc<Registry>,
    orchestrator: Arc<dyn Orchestrator>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl RolloutManager {
    pub fn new(cfg: &Config, orchestrator: Arc<dyn Orchestrator>, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            orchestrator,
            batch_size: cfg.rollout().batch_size,
            batch_timeout: cfg.rollout().batch_timeout,
        })
    }

    /// Rolls `service` out to `version`. Cancellation through
    /// `Registry::cancel` is honoured between batches.
    pub async fn rollout(&self, service: &str, version: &str, batch_size: Option<usize>) -> Result<RolloutResult> {
        if version.trim().is_empty() {
            return Err(ControllerError::InvalidRequest(format!(
                "rollout of {service} needs a non-empty version"
            )));
        }
        let guard = self.registry.begin(service, "rollout")?;
        let batch_size = batch_size.unwrap_or(self.batch_size);
        self.run(service, version, batch_size, guard.token()).await
    }

    /// Rolls `service` back to its previous stable version.
    pub async fn rollback(&self, service: &str) -> Result<RolloutResult> {
        let guard = self.registry.begin(service, "rollback")?;
        let previous = self
            .registry
            .snapshot(service)?
            .previous_version
            .ok_or_else(|| ControllerError::NoPreviousVersion(service.to_string()))?;
        self.run(service, &previous, self.batch_size, guard.token()).await
    }

    async fn run(&self, service: &str, version: &str, batch_size: usize, token: CancellationToken) -> Result<RolloutResult> {
        let record = self.registry.snapshot(service)?;
        let from = record.version.clone();
        let original = record.current_replicas();
        let plan = RolloutPlan::new(&record, version, batch_size);

        info!(
            component = "rollout",
            event = "begin",
            service = service,
            from = %from,
            to = version,
            batches = plan.len(),
            "rollout started"
        );
        self.registry.set_rollout(service, RolloutState::RollingOut)?;

        let mut created: Vec<ReplicaId> = Vec::new();
        let mut completed = 0;
        let mut failure = None;
        for (n, batch) in plan.batches.iter().enumerate() {
            if token.is_cancelled() {
                failure = Some(ControllerError::Cancelled(service.to_string()));
                break;
            }
            match self.run_batch(service, version, batch, &mut created).await {
                Ok(()) => {
                    completed += 1;
                    info!(component = "rollout", event = "batch_done", service = service, batch = n + 1, of = plan.len(), "batch healthy");
                }
                Err(e) => {
                    warn!(component = "rollout", event = "batch_failed", service = service, batch = n + 1, error = %e, "batch failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        let outcome = match failure {
            None => {
                self.registry.finish_rollout(service, &from, version)?;
                info!(component = "rollout", event = "completed", service = service, version = version, "rollout completed");
                RolloutOutcome::Completed
            }
            Some(cause) => self.revert(service, &from, version, original, &created, cause).await?,
        };

        metrics::counter!(
            "stackctl_rollouts_total",
            "service" => service.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        Ok(RolloutResult {
            service: service.to_string(),
            from_version: from,
            to_version: version.to_string(),
            batches_total: plan.len(),
            batches_completed: completed,
            outcome,
        })
    }

    async fn run_batch(&self, service: &str, version: &str, batch: &[ReplicaId], created: &mut Vec<ReplicaId>) -> Result<()> {
        let record = self.registry.snapshot(service)?;
        let healthy_outside = record
            .replicas
            .iter()
            .filter(|r| r.health == HealthStatus::Healthy && !batch.contains(&r.id))
            .count();
        let surge = healthy_outside == 0;

        if !surge {
            self.stop_all(service, batch).await?;
        }

        let mut fresh = Vec::with_capacity(batch.len());
        for _ in batch {
            let id = self.orchestrator.start_replica(service, version).await?;
            self.registry.add_replica(service, id.clone(), version)?;
            created.push(id.clone());
            fresh.push(id);
        }

        let healthy = self
            .registry
            .wait_until(service, self.batch_timeout, |r| {
                fresh.iter().all(|id| r.is_replica_healthy(id))
            })
            .await?;
        if !healthy {
            return Err(ControllerError::Timeout {
                service: service.to_string(),
                operation: "rollout batch",
                after: self.batch_timeout,
            });
        }

        if surge {
            self.stop_all(service, batch).await?;
        }
        Ok(())
    }

    async fn stop_all(&self, service: &str, ids: &[ReplicaId]) -> Result<()> {
        for id in ids {
            self.orchestrator.stop_replica(service, id).await?;
            self.registry.remove_replica(service, id)?;
        }
        Ok(())
    }

    /// Restores `original` replicas at `from`, removing what this rollout created.
    ///
    /// Unhealthy new replicas go first; healthy ones keep serving until the
    /// restored replicas pass their health gate. If they never do, or nothing
    /// else would be left healthy, the healthy new replicas stay up and the
    /// outcome is `RollbackFailed`.
    async fn revert(
        &self,
        service: &str,
        from: &str,
        to: &str,
        original: usize,
        created: &[ReplicaId],
        cause: ControllerError,
    ) -> Result<RolloutOutcome> {
        self.registry.set_rollout(service, RolloutState::RollingBack)?;
        metrics::counter!("stackctl_rollbacks_total", "service" => service.to_string()).increment(1);
        warn!(component = "rollout", event = "rollback", service = service, to = from, cause = %cause, "rolling back");

        let mut problems = Vec::new();
        let mut restore_ok = true;

        let record = self.registry.snapshot(service)?;
        let unhealthy: Vec<ReplicaId> = created
            .iter()
            .filter(|id| record.replica(id).is_some() && !record.is_replica_healthy(id))
            .cloned()
            .collect();
        self.stop_quietly(service, &unhealthy, &mut problems).await;

        let record = self.registry.snapshot(service)?;
        let survivors = record
            .replicas
            .iter()
            .filter(|r| !created.contains(&r.id))
            .count();
        let mut restored = Vec::new();
        for _ in survivors..original {
            match self.orchestrator.start_replica(service, from).await {
                Ok(id) => {
                    self.registry.add_replica(service, id.clone(), from)?;
                    restored.push(id);
                }
                Err(e) => {
                    problems.push(e.to_string());
                    restore_ok = false;
                    break;
                }
            }
        }

        if !restored.is_empty() {
            let healthy = self
                .registry
                .wait_until(service, self.batch_timeout, |r| {
                    restored.iter().all(|id| r.is_replica_healthy(id))
                })
                .await?;
            if !healthy {
                restore_ok = false;
                problems.push(format!(
                    "restored replicas not healthy after {}",
                    humantime::format_duration(self.batch_timeout)
                ));
            }
        }

        let record = self.registry.snapshot(service)?;
        let leftovers: Vec<ReplicaId> = created
            .iter()
            .filter(|id| record.replica(id).is_some())
            .cloned()
            .collect();
        let healthy_elsewhere = record
            .replicas
            .iter()
            .any(|r| r.health == HealthStatus::Healthy && !leftovers.contains(&r.id));
        let keep_healthy = !restore_ok || !healthy_elsewhere;
        let (kept, doomed): (Vec<ReplicaId>, Vec<ReplicaId>) = leftovers
            .into_iter()
            .partition(|id| keep_healthy && record.is_replica_healthy(id));
        self.stop_quietly(service, &doomed, &mut problems).await;
        if !kept.is_empty() {
            warn!(
                component = "rollout",
                event = "kept_new",
                service = service,
                version = to,
                replicas = kept.len(),
                "no healthy replica at previous version, keeping new ones"
            );
            problems.push(format!("kept {} healthy replica(s) at {to}", kept.len()));
        }

        self.registry.set_rollout(service, RolloutState::Failed)?;

        let reason = cause.to_string();
        if problems.is_empty() {
            info!(component = "rollout", event = "rolled_back", service = service, version = from, "previous version restored");
            Ok(RolloutOutcome::RolledBack { reason })
        } else {
            let detail = problems.join("; ");
            error!(component = "rollout", event = "rollback_failed", service = service, error = %detail, "rollback incomplete");
            Ok(RolloutOutcome::RollbackFailed {
                reason: format!("{reason}; rollback: {detail}"),
            })
        }
    }

    async fn stop_quietly(&self, service: &str, ids: &[ReplicaId], problems: &mut Vec<String>) {
        for id in ids {
            match self.orchestrator.stop_replica(service, id).await {
                Ok(()) => {
                    if let Err(e) = self.registry.remove_replica(service, id) {
                        problems.push(e.to_string());
                    }
                }
                Err(e) => problems.push(e.to_string()),
            }
        }
    }
}
