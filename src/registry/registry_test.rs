#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::config::new_test_config;
    use crate::error::ControllerError;
    use crate::model::{HealthStatus, RolloutState, StartupPhase};
    use crate::orchestrator::ReplicaStatus;
    use crate::registry::{ControllerEvent, Registry};

    fn observed(ids: &[&str], version: &str) -> Vec<ReplicaStatus> {
        ids.iter()
            .map(|id| ReplicaStatus {
                id: id.to_string(),
                version: version.to_string(),
                ready: true,
            })
            .collect()
    }

    #[test]
    fn from_config_tracks_every_service() {
        let registry = Registry::from_config(&new_test_config());

        assert_eq!(registry.names(), vec!["backend", "db", "frontend"]);
        let backend = registry.snapshot("backend").unwrap();
        assert_eq!(backend.desired_replicas, 3);
        assert_eq!(backend.version, "v1");
        assert_eq!(backend.depends_on, vec!["db"]);
        assert_eq!(backend.health, HealthStatus::Unknown);
        assert_eq!(backend.startup, StartupPhase::Pending);

        assert!(matches!(
            registry.snapshot("cache"),
            Err(ControllerError::UnknownService(_))
        ));
    }

    #[test]
    fn second_operation_is_busy_until_guard_drops() {
        let registry = Registry::from_config(&new_test_config());

        let guard = registry.begin("backend", "rollout").unwrap();
        assert_eq!(
            registry.snapshot("backend").unwrap().operation.as_deref(),
            Some("rollout")
        );
        match registry.begin("backend", "scale") {
            Err(ControllerError::Busy { operation, .. }) => assert_eq!(operation, "rollout"),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("second operation must be rejected"),
        }
        // Other services are independent.
        let _frontend = registry.begin("frontend", "scale").unwrap();

        drop(guard);
        assert!(registry.snapshot("backend").unwrap().operation.is_none());
        let _again = registry.begin("backend", "scale").unwrap();
    }

    #[test]
    fn cancel_reaches_only_the_running_operation() {
        let registry = Registry::from_config(&new_test_config());
        assert!(!registry.cancel("backend").unwrap());

        let guard = registry.begin("backend", "rollout").unwrap();
        let token = guard.token();
        assert!(registry.cancel("backend").unwrap());
        assert!(token.is_cancelled());
        drop(guard);

        let next = registry.begin("backend", "rollout").unwrap();
        assert!(!next.token().is_cancelled());
        assert!(!registry.cancel("db").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_sees_later_updates() {
        let registry = Registry::from_config(&new_test_config());

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .wait_until("db", Duration::from_secs(10), |r| r.startup == StartupPhase::Ready)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        registry.set_startup("db", StartupPhase::Ready).unwrap();
        assert!(waiter.await.unwrap().unwrap());

        let timed_out = registry
            .wait_until("db", Duration::from_secs(5), |r| r.desired_replicas == 7)
            .await
            .unwrap();
        assert!(!timed_out);
    }

    #[tokio::test]
    async fn adopt_keeps_known_replicas() {
        let registry = Registry::from_config(&new_test_config());
        registry
            .adopt_replicas("backend", &observed(&["b-1", "b-2"], "v1"))
            .unwrap();
        let mut health = HashMap::new();
        health.insert("b-1".to_string(), HealthStatus::Healthy);
        registry
            .record_health("backend", HealthStatus::Healthy, &health)
            .unwrap();
        let first = registry.snapshot("backend").unwrap();

        registry
            .adopt_replicas("backend", &observed(&["b-1", "b-3"], "v1"))
            .unwrap();

        let record = registry.snapshot("backend").unwrap();
        let ids: Vec<&str> = record.replicas.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b-1", "b-3"]);
        assert_eq!(record.replicas[0], first.replicas[0]);
        assert_eq!(record.replicas[1].health, HealthStatus::Unknown);
        assert!(record.replicas[1].seq > first.replicas[1].seq);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let registry = Registry::from_config(&new_test_config());
        let mut events = registry.events();

        registry.set_rollout("backend", RolloutState::RollingOut).unwrap();
        registry.finish_rollout("backend", "v1", "v2").unwrap();
        registry.remove_replica("backend", "missing").unwrap();
        registry.add_replica("backend", "b-9".to_string(), "v2").unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::RolloutChanged {
                service: "backend".into(),
                from: RolloutState::Stable,
                to: RolloutState::RollingOut,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::RolloutChanged {
                service: "backend".into(),
                from: RolloutState::RollingOut,
                to: RolloutState::Stable,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::ReplicaAdded {
                service: "backend".into(),
                replica: "b-9".into(),
                version: "v2".into(),
            }
        );

        let record = registry.snapshot("backend").unwrap();
        assert_eq!(record.version, "v2");
        assert_eq!(record.previous_version.as_deref(), Some("v1"));
    }
}
