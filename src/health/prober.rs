//! Health prober.
//!
//! Polls the orchestrator for replica readiness and feeds the results
//! through per-target debounce machines. A service-level probe succeeds when
//! the status call succeeds and at least one replica is ready; a replica-level
//! probe succeeds when that replica is reported ready. Timeouts, call errors
//! and not-ready replicas are all the same "probe failed" signal.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Debounce, HealthSettings};
use crate::config::{Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::model::HealthStatus;
use crate::orchestrator::{Orchestrator, ReplicaId, ReplicaStatus};
use crate::registry::Registry;

pub struct Prober {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<Registry>,
    settings: HashMap<String, HealthSettings>,
    services: DashMap<String, Debounce>,
    replicas: DashMap<(String, ReplicaId), Debounce>,
}

impl Prober {
    pub fn new(
        cfg: &Config,
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        let settings = cfg
            .services()
            .keys()
            .map(|name| (name.clone(), cfg.health_for(name)))
            .collect();

        Arc::new(Self {
            orchestrator,
            registry,
            settings,
            services: DashMap::new(),
            replicas: DashMap::new(),
        })
    }

    pub fn settings(&self, service: &str) -> Result<HealthSettings> {
        self.settings
            .get(service)
            .copied()
            .ok_or_else(|| ControllerError::UnknownService(service.to_string()))
    }

    async fn observe(&self, service: &str, settings: &HealthSettings) -> Option<Vec<ReplicaStatus>> {
        match timeout(settings.timeout, self.orchestrator.get_replica_status(service)).await {
            Ok(Ok(list)) => Some(list),
            Ok(Err(e)) => {
                debug!(component = "prober", service = service, error = %e, "probe failed");
                None
            }
            Err(_) => {
                debug!(component = "prober", service = service, "probe timed out");
                None
            }
        }
    }

    /// Runs one probe round for `service` and returns its debounced health.
    pub async fn probe(&self, service: &str) -> Result<HealthStatus> {
        let settings = self.settings(service)?;
        let observed = self.observe(service, &settings).await;
        let ready: HashSet<&str> = observed
            .iter()
            .flatten()
            .filter(|r| r.ready)
            .map(|r| r.id.as_str())
            .collect();

        let known = self.registry.snapshot(service)?.replicas;
        let mut replica_health = HashMap::with_capacity(known.len());
        for replica in &known {
            let key = (service.to_string(), replica.id.clone());
            let status = self
                .replicas
                .entry(key)
                .or_insert_with(|| Debounce::new(settings.healthy_threshold, settings.unhealthy_threshold))
                .observe(ready.contains(replica.id.as_str()));
            replica_health.insert(replica.id.clone(), status);
        }
        // Forget debounce state of replicas that are gone.
        self.replicas
            .retain(|(svc, id), _| svc != service || replica_health.contains_key(id));

        let ok = !ready.is_empty();
        let status = self
            .services
            .entry(service.to_string())
            .or_insert_with(|| Debounce::new(settings.healthy_threshold, settings.unhealthy_threshold))
            .observe(ok);

        metrics::counter!(
            "stackctl_probes_total",
            "service" => service.to_string(),
            "result" => if ok { "success" } else { "failure" }
        )
        .increment(1);

        self.registry.record_health(service, status, &replica_health)?;
        Ok(status)
    }

    /// Probes `service` on its interval until shutdown.
    pub async fn watch(self: Arc<Self>, service: String, shutdown: CancellationToken) {
        let settings = match self.settings(&service) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(component = "prober", service = %service, error = %e, "cannot watch service");
                return;
            }
        };

        let mut ticker = interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.probe(&service).await {
                        warn!(component = "prober", service = %service, error = %e, "probe round failed");
                    }
                }
            }
        }
    }

    /// Starts one watch loop per configured service.
    pub fn spawn_watchers(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.settings
            .keys()
            .map(|service| {
                let prober = self.clone();
                let service = service.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { prober.watch(service, shutdown).await })
            })
            .collect()
    }
}
