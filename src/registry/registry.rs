// Per-service state store with serialized structural mutation.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use super::events::ControllerEvent;
use crate::config::{Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::model::{HealthStatus, Replica, RolloutState, ServiceRecord, StartupPhase};
use crate::orchestrator::{ReplicaId, ReplicaStatus};

const EVENTS_CAPACITY: usize = 1024;

struct Slot {
    state: watch::Sender<ServiceRecord>,
    op: Arc<AsyncMutex<()>>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Holds one record per configured service.
///
/// Records are published through `watch` channels: every mutation notifies
/// subscribers, reads are clones of the latest value and never wait on a
/// writer. Structural operations (start, scale, rollout) additionally take the
/// service's operation guard, at most one at a time.
pub struct Registry {
    slots: BTreeMap<String, Arc<Slot>>,
    seq: AtomicU64,
    events: broadcast::Sender<ControllerEvent>,
}

impl Registry {
    pub fn new<I>(records: I) -> Arc<Self>
    where
        I: IntoIterator<Item = ServiceRecord>,
    {
        let slots = records
            .into_iter()
            .map(|record| {
                let name = record.name.clone();
                let (state, _) = watch::channel(record);
                let slot = Slot {
                    state,
                    op: Arc::new(AsyncMutex::new(())),
                    cancel: Mutex::new(None),
                };
                (name, Arc::new(slot))
            })
            .collect();
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);

        Arc::new(Self {
            slots,
            seq: AtomicU64::new(0),
            events,
        })
    }

    /// Creates records for every configured service, at its configured version.
    pub fn from_config(cfg: &Config) -> Arc<Self> {
        Self::new(cfg.services().iter().map(|(name, spec)| {
            ServiceRecord::new(
                name.clone(),
                spec.depends_on.clone(),
                spec.replicas,
                spec.version.clone(),
            )
        }))
    }

    fn slot(&self, name: &str) -> Result<&Arc<Slot>> {
        self.slots
            .get(name)
            .ok_or_else(|| ControllerError::UnknownService(name.to_string()))
    }

    fn modify<F, R>(&self, name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut ServiceRecord) -> R,
    {
        let slot = self.slot(name)?;
        let mut out = None;
        slot.state.send_modify(|record| {
            out = Some(f(record));
            record.updated_at = Utc::now();
        });
        out.ok_or_else(|| ControllerError::UnknownService(name.to_string()))
    }

    pub(crate) fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn names(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn snapshot(&self, name: &str) -> Result<ServiceRecord> {
        Ok(self.slot(name)?.state.borrow().clone())
    }

    /// Snapshots of all services, ordered by name.
    pub fn snapshots(&self) -> Vec<ServiceRecord> {
        self.slots
            .values()
            .map(|slot| slot.state.borrow().clone())
            .collect()
    }

    pub fn subscribe(&self, name: &str) -> Result<watch::Receiver<ServiceRecord>> {
        Ok(self.slot(name)?.state.subscribe())
    }

    pub fn events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn publisher(&self) -> broadcast::Sender<ControllerEvent> {
        self.events.clone()
    }

    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Waits until `pred` holds for the service's record or `timeout` elapses.
    /// Returns whether the predicate was satisfied.
    pub async fn wait_until<F>(&self, name: &str, timeout: Duration, pred: F) -> Result<bool>
    where
        F: FnMut(&ServiceRecord) -> bool + Send,
    {
        let mut rx = self.subscribe(name)?;
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(pred).await.map(|_| ()).is_ok()
        })
        .await;
        Ok(matches!(waited, Ok(true)))
    }

    /// Takes the service's operation guard, or fails with `Busy`.
    pub fn begin(&self, name: &str, operation: &str) -> Result<OperationGuard> {
        let slot = self.slot(name)?.clone();
        let lock = match slot.op.clone().try_lock_owned() {
            Ok(lock) => lock,
            Err(_) => {
                let current = slot.state.borrow().operation.clone().unwrap_or_default();
                return Err(ControllerError::Busy {
                    service: name.to_string(),
                    operation: current,
                });
            }
        };

        let token = CancellationToken::new();
        *slot.cancel.lock() = Some(token.clone());
        slot.state.send_modify(|record| {
            record.operation = Some(operation.to_string());
            record.updated_at = Utc::now();
        });

        Ok(OperationGuard {
            slot,
            token,
            _lock: lock,
        })
    }

    /// Signals the in-flight operation of a service to stop at its next checkpoint.
    /// Returns false when nothing was running.
    pub fn cancel(&self, name: &str) -> Result<bool> {
        let slot = self.slot(name)?;
        let cancel = slot.cancel.lock();
        match cancel.as_ref() {
            Some(token) => {
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn set_startup(&self, name: &str, phase: StartupPhase) -> Result<()> {
        let changed = self.modify(name, |r| {
            let changed = r.startup != phase;
            r.startup = phase;
            changed
        })?;
        if changed {
            self.emit(ControllerEvent::StartupChanged {
                service: name.to_string(),
                phase,
            });
        }
        Ok(())
    }

    pub fn set_rollout(&self, name: &str, state: RolloutState) -> Result<()> {
        let from = self.modify(name, |r| std::mem::replace(&mut r.rollout, state))?;
        if from != state {
            self.emit(ControllerEvent::RolloutChanged {
                service: name.to_string(),
                from,
                to: state,
            });
        }
        Ok(())
    }

    /// Marks a rollout to `to` as successfully completed.
    pub fn finish_rollout(&self, name: &str, from: &str, to: &str) -> Result<()> {
        let prev = self.modify(name, |r| {
            if from != to {
                r.previous_version = Some(from.to_string());
            }
            r.version = to.to_string();
            std::mem::replace(&mut r.rollout, RolloutState::Stable)
        })?;
        if prev != RolloutState::Stable {
            self.emit(ControllerEvent::RolloutChanged {
                service: name.to_string(),
                from: prev,
                to: RolloutState::Stable,
            });
        }
        Ok(())
    }

    pub fn set_desired(&self, name: &str, replicas: usize) -> Result<()> {
        self.modify(name, |r| r.desired_replicas = replicas)
    }

    pub fn add_replica(&self, name: &str, id: ReplicaId, version: &str) -> Result<()> {
        let seq = self.next_seq();
        self.modify(name, |r| {
            r.replicas.push(Replica {
                id: id.clone(),
                version: version.to_string(),
                health: HealthStatus::Unknown,
                seq,
            })
        })?;
        self.emit(ControllerEvent::ReplicaAdded {
            service: name.to_string(),
            replica: id,
            version: version.to_string(),
        });
        Ok(())
    }

    pub fn remove_replica(&self, name: &str, id: &str) -> Result<()> {
        let removed = self.modify(name, |r| {
            let before = r.replicas.len();
            r.replicas.retain(|replica| replica.id != id);
            before != r.replicas.len()
        })?;
        if removed {
            self.emit(ControllerEvent::ReplicaRemoved {
                service: name.to_string(),
                replica: id.to_string(),
            });
        }
        Ok(())
    }

    /// Replaces the tracked replica set with what the orchestrator reports,
    /// keeping health and sequence of replicas already known.
    pub fn adopt_replicas(&self, name: &str, observed: &[ReplicaStatus]) -> Result<()> {
        let mut fresh = Vec::new();
        self.modify(name, |r| {
            let known: HashMap<&str, &Replica> =
                r.replicas.iter().map(|rep| (rep.id.as_str(), rep)).collect();
            let adopted: Vec<Replica> = observed
                .iter()
                .map(|status| match known.get(status.id.as_str()) {
                    Some(existing) => (*existing).clone(),
                    None => {
                        fresh.push((status.id.clone(), status.version.clone()));
                        Replica {
                            id: status.id.clone(),
                            version: status.version.clone(),
                            health: HealthStatus::Unknown,
                            seq: self.next_seq(),
                        }
                    }
                })
                .collect();
            r.replicas = adopted;
        })?;
        for (replica, version) in fresh {
            self.emit(ControllerEvent::ReplicaAdded {
                service: name.to_string(),
                replica,
                version,
            });
        }
        Ok(())
    }

    /// Stores debounced probe results for a service and its replicas.
    pub fn record_health(
        &self,
        name: &str,
        status: HealthStatus,
        replicas: &HashMap<ReplicaId, HealthStatus>,
    ) -> Result<()> {
        let (from, healthy) = self.modify(name, |r| {
            for replica in r.replicas.iter_mut() {
                if let Some(h) = replicas.get(&replica.id) {
                    replica.health = *h;
                }
            }
            let from = std::mem::replace(&mut r.health, status);
            (from, r.healthy_replicas())
        })?;

        metrics::gauge!("stackctl_healthy_replicas", "service" => name.to_string()).set(healthy as f64);
        if from != status {
            self.emit(ControllerEvent::HealthChanged {
                service: name.to_string(),
                from,
                to: status,
            });
        }
        Ok(())
    }
}

/// Exclusive right to change one service's structure. Released on drop.
pub struct OperationGuard {
    slot: Arc<Slot>,
    token: CancellationToken,
    _lock: OwnedMutexGuard<()>,
}

impl OperationGuard {
    /// Cancellation signal for this operation, fired by `Registry::cancel`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.slot.cancel.lock().take();
        self.slot.state.send_modify(|record| {
            record.operation = None;
            record.updated_at = Utc::now();
        });
    }
}
