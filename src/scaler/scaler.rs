// Scaler: moves a service's replica count inside its configured bounds.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;
use crate::topology::DependencyGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleOutcome {
    Completed,
    Unchanged,
    /// Stopped early; `reached` replicas are running.
    Failed { reason: String },
    Cancelled,
}

impl ScaleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleOutcome::Completed => "completed",
            ScaleOutcome::Unchanged => "unchanged",
            ScaleOutcome::Failed { .. } => "failed",
            ScaleOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaleResult {
    pub service: String,
    pub from: usize,
    pub to: usize,
    pub reached: usize,
    pub outcome: ScaleOutcome,
}

impl ScaleResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, ScaleOutcome::Completed | ScaleOutcome::Unchanged)
    }
}

pub struct Scaler {
    registry: Arc<Registry>,
    orchestrator: Arc<dyn Orchestrator>,
    graph: Arc<DependencyGraph>,
    bounds: HashMap<String, (usize, usize)>,
    timeout: Duration,
}

impl Scaler {
    pub fn new(
        cfg: &Config,
        graph: Arc<DependencyGraph>,
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        let bounds = cfg
            .services()
            .iter()
            .map(|(name, spec)| (name.clone(), spec.bounds()))
            .collect();

        Arc::new(Self {
            registry,
            orchestrator,
            graph,
            bounds,
            timeout: cfg.scaler().timeout,
        })
    }

    pub fn bounds(&self, service: &str) -> Result<(usize, usize)> {
        self.bounds
            .get(service)
            .copied()
            .ok_or_else(|| ControllerError::UnknownService(service.to_string()))
    }

    /// Scales `service` to `target` replicas.
    ///
    /// Out-of-range targets are rejected before anything changes. Growth adds
    /// one replica at a time and counts it only once Healthy; shrinking removes
    /// the newest replicas first.
    pub async fn scale(&self, service: &str, target: usize) -> Result<ScaleResult> {
        let (min, max) = self.bounds(service)?;
        if target < min || target > max {
            return Err(ControllerError::Bounds {
                service: service.to_string(),
                requested: target,
                min,
                max,
            });
        }

        let guard = self.registry.begin(service, "scale")?;
        let token = guard.token();

        let record = self.registry.snapshot(service)?;
        let from = record.current_replicas();

        if target == 0 {
            let dependents = self.running(self.graph.transitive_dependents(service), true);
            if !dependents.is_empty() {
                return Err(ControllerError::DependencyGuard {
                    service: service.to_string(),
                    dependents,
                });
            }
        } else if target > from {
            let stopped = self.running(self.graph.transitive_dependencies(service), false);
            if !stopped.is_empty() {
                return Err(ControllerError::DependencyDown {
                    service: service.to_string(),
                    dependencies: stopped,
                });
            }
        }

        info!(component = "scaler", event = "begin", service = service, from = from, to = target, "scaling");

        let mut reached = from;
        let outcome = if target == from {
            ScaleOutcome::Unchanged
        } else if target > from {
            let mut outcome = ScaleOutcome::Completed;
            while reached < target {
                if token.is_cancelled() {
                    outcome = ScaleOutcome::Cancelled;
                    break;
                }
                match self.add_one(service, &record.version).await {
                    Ok(()) => reached += 1,
                    Err(e) => {
                        warn!(component = "scaler", event = "scale_up_failed", service = service, reached = reached, error = %e, "scale up stopped");
                        outcome = ScaleOutcome::Failed { reason: e.to_string() };
                        break;
                    }
                }
            }
            outcome
        } else {
            let mut victims = record.replicas.clone();
            victims.sort_by(|a, b| b.seq.cmp(&a.seq));
            victims.truncate(from - target);

            let mut outcome = ScaleOutcome::Completed;
            for victim in victims {
                if token.is_cancelled() {
                    outcome = ScaleOutcome::Cancelled;
                    break;
                }
                if let Err(e) = self.orchestrator.stop_replica(service, &victim.id).await {
                    warn!(component = "scaler", event = "scale_down_failed", service = service, replica = %victim.id, error = %e, "scale down stopped");
                    outcome = ScaleOutcome::Failed { reason: e.to_string() };
                    break;
                }
                self.registry.remove_replica(service, &victim.id)?;
                reached -= 1;
            }
            outcome
        };

        self.registry.set_desired(service, reached)?;
        metrics::counter!(
            "stackctl_scale_total",
            "service" => service.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        info!(component = "scaler", event = "end", service = service, reached = reached, outcome = outcome.as_str(), "scaling finished");

        Ok(ScaleResult {
            service: service.to_string(),
            from,
            to: target,
            reached,
            outcome,
        })
    }

    /// The `names` that run at least one replica (`running`) or none.
    fn running(&self, names: Vec<String>, running: bool) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| {
                self.registry
                    .snapshot(name)
                    .map(|r| (r.current_replicas() > 0) == running)
                    .unwrap_or(false)
            })
            .collect()
    }

    async fn add_one(&self, service: &str, version: &str) -> Result<()> {
        let id = self.orchestrator.start_replica(service, version).await?;
        self.registry.add_replica(service, id.clone(), version)?;

        let healthy = self
            .registry
            .wait_until(service, self.timeout, |r| r.is_replica_healthy(&id))
            .await?;
        if healthy {
            return Ok(());
        }

        if let Err(e) = self.orchestrator.stop_replica(service, &id).await {
            warn!(component = "scaler", service = service, replica = %id, error = %e, "cannot stop unhealthy replica");
        } else {
            self.registry.remove_replica(service, &id)?;
        }
        Err(ControllerError::Timeout {
            service: service.to_string(),
            operation: "scale up",
            after: self.timeout,
        })
    }
}
