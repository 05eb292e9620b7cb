// Startup sequencer: brings services up in dependency order, gated on health.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::model::{HealthStatus, StartupPhase};
use crate::orchestrator::Orchestrator;
use crate::registry::Registry;
use crate::topology::DependencyGraph;

type Phases = BTreeMap<String, StartupPhase>;

/// Outcome of one startup run.
#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub order: Vec<String>,
    pub phases: Phases,
    pub errors: BTreeMap<String, String>,
}

impl StartupReport {
    pub fn is_ready(&self) -> bool {
        self.phases.values().all(|p| *p == StartupPhase::Ready)
    }

    pub fn phase(&self, service: &str) -> Option<StartupPhase> {
        self.phases.get(service).copied()
    }
}

/// Runs one task per service. A task waits for its dependencies to settle,
/// then either starts its service or, if any dependency did not become
/// Ready, marks it Blocked without touching the orchestrator. Services on
/// independent branches make progress concurrently.
pub struct StartupSequencer {
    registry: Arc<Registry>,
    orchestrator: Arc<dyn Orchestrator>,
    graph: Arc<DependencyGraph>,
    timeout: Duration,
}

impl StartupSequencer {
    pub fn new(
        cfg: &Config,
        graph: Arc<DependencyGraph>,
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            orchestrator,
            graph,
            timeout: cfg.startup().timeout,
        })
    }

    /// Starts every service and reports where each one ended up.
    pub async fn start(self: &Arc<Self>) -> StartupReport {
        let order = self.graph.topological_order().to_vec();
        info!(component = "startup", event = "begin", order = ?order, "starting services");

        let phases: Phases = order
            .iter()
            .map(|name| (name.clone(), StartupPhase::Pending))
            .collect();
        for name in &order {
            if let Err(e) = self.registry.set_startup(name, StartupPhase::Pending) {
                warn!(component = "startup", service = %name, error = %e, "cannot reset startup phase");
            }
        }
        let (tx, _) = watch::channel(phases);
        let tx = Arc::new(tx);

        let mut tasks = JoinSet::new();
        for name in order.iter().cloned() {
            let sequencer = self.clone();
            let tx = tx.clone();
            tasks.spawn(async move { sequencer.start_one(name, tx).await });
        }

        let mut errors = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Some(err))) => {
                    errors.insert(name, err);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(component = "startup", error = %e, "startup task aborted");
                }
            }
        }

        let phases = tx.borrow().clone();
        let report = StartupReport {
            order,
            phases,
            errors,
        };
        info!(
            component = "startup",
            event = "end",
            ready = report.is_ready(),
            failed = report.errors.len(),
            "startup finished"
        );
        report
    }

    fn set_phase(&self, phases: &watch::Sender<Phases>, name: &str, phase: StartupPhase) {
        phases.send_modify(|p| {
            p.insert(name.to_string(), phase);
        });
        if let Err(e) = self.registry.set_startup(name, phase) {
            warn!(component = "startup", service = %name, error = %e, "cannot record startup phase");
        }
    }

    async fn start_one(
        self: Arc<Self>,
        name: String,
        phases: Arc<watch::Sender<Phases>>,
    ) -> (String, Option<String>) {
        let deps = self.graph.dependencies(&name);
        if !deps.is_empty() {
            let mut rx = phases.subscribe();
            let settled = rx
                .wait_for(|p| {
                    deps.iter()
                        .all(|d| p.get(d).map(|phase| phase.is_terminal()).unwrap_or(true))
                })
                .await
                .map(|p| deps.iter().all(|d| p.get(d) == Some(&StartupPhase::Ready)));

            if !matches!(settled, Ok(true)) {
                self.set_phase(&phases, &name, StartupPhase::Blocked);
                warn!(
                    component = "startup",
                    event = "blocked",
                    service = %name,
                    depends_on = ?deps,
                    "dependency did not become ready, service not attempted"
                );
                return (name, None);
            }
        }

        match self.bring_up(&name, &phases).await {
            Ok(()) => {
                self.set_phase(&phases, &name, StartupPhase::Ready);
                metrics::counter!("stackctl_startups_total", "service" => name.clone(), "result" => "ready").increment(1);
                info!(component = "startup", event = "ready", service = %name, "service ready");
                (name, None)
            }
            Err(e) => {
                self.set_phase(&phases, &name, StartupPhase::Failed);
                metrics::counter!("stackctl_startups_total", "service" => name.clone(), "result" => "failed").increment(1);
                error!(component = "startup", event = "failed", service = %name, error = %e, "service failed to start");
                (name, Some(e.to_string()))
            }
        }
    }

    async fn bring_up(&self, name: &str, phases: &watch::Sender<Phases>) -> Result<()> {
        let _guard = self.registry.begin(name, "start")?;
        self.set_phase(phases, name, StartupPhase::Starting);

        let record = self.registry.snapshot(name)?;
        self.orchestrator
            .set_image_version(name, &record.version)
            .await?;
        self.orchestrator
            .set_replicas(name, record.desired_replicas)
            .await?;
        let observed = self.orchestrator.get_replica_status(name).await?;
        self.registry.adopt_replicas(name, &observed)?;

        if record.desired_replicas == 0 {
            return Ok(());
        }

        self.set_phase(phases, name, StartupPhase::WaitingHealthy);
        let healthy = self
            .registry
            .wait_until(name, self.timeout, |r| r.health == HealthStatus::Healthy)
            .await?;
        if !healthy {
            return Err(ControllerError::Timeout {
                service: name.to_string(),
                operation: "startup",
                after: self.timeout,
            });
        }
        Ok(())
    }
}
