// Dependency-ordered startup scenarios.

use crate::config::{new_test_config, ServiceSpec};
use crate::model::{HealthStatus, StartupPhase};
use crate::tests::support::Stack;

fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("missing call {call:?} in {calls:?}"))
}

#[tokio::test(start_paused = true)]
async fn starts_services_in_dependency_order() {
    let stack = Stack::default_stack();
    stack.watch();

    let report = stack.start().await;

    assert!(report.is_ready(), "{report:?}");
    assert_eq!(report.order, vec!["db", "backend", "frontend"]);
    assert!(report.errors.is_empty());

    let calls = stack.orchestrator.calls();
    let db = position(&calls, "set_replicas db 1");
    let backend = position(&calls, "set_replicas backend 3");
    let frontend = position(&calls, "set_replicas frontend 2");
    assert!(db < backend && backend < frontend, "{calls:?}");

    for name in ["db", "backend", "frontend"] {
        let record = stack.registry.snapshot(name).unwrap();
        assert_eq!(record.startup, StartupPhase::Ready);
        assert_eq!(record.health, HealthStatus::Healthy);
        assert_eq!(record.current_replicas(), record.desired_replicas);
        assert!(record.operation.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn failed_database_blocks_dependents() {
    let stack = Stack::default_stack();
    stack.orchestrator.never_ready("db");
    stack.watch();

    let report = stack.start().await;

    assert!(!report.is_ready());
    assert_eq!(report.phase("db"), Some(StartupPhase::Failed));
    assert_eq!(report.phase("backend"), Some(StartupPhase::Blocked));
    assert_eq!(report.phase("frontend"), Some(StartupPhase::Blocked));
    assert!(report.errors["db"].contains("timed out"), "{:?}", report.errors);

    assert!(stack.orchestrator.calls_for("backend").is_empty());
    assert!(stack.orchestrator.calls_for("frontend").is_empty());
    assert_eq!(
        stack.registry.snapshot("backend").unwrap().startup,
        StartupPhase::Blocked
    );
}

#[tokio::test(start_paused = true)]
async fn orchestrator_error_fails_only_that_branch() {
    let mut cfg = new_test_config();
    cfg.controller.services.insert(
        "worker".to_string(),
        ServiceSpec {
            image: None,
            version: "w1".to_string(),
            replicas: 1,
            min: Some(0),
            max: Some(2),
            depends_on: vec!["db".to_string()],
            health: None,
        },
    );
    let stack = Stack::new(cfg);
    stack.orchestrator.fail_operation("backend", "set_replicas");
    stack.watch();

    let report = stack.start().await;

    assert_eq!(report.phase("db"), Some(StartupPhase::Ready));
    assert_eq!(report.phase("worker"), Some(StartupPhase::Ready));
    assert_eq!(report.phase("backend"), Some(StartupPhase::Failed));
    assert_eq!(report.phase("frontend"), Some(StartupPhase::Blocked));
    assert!(report.errors.contains_key("backend"));
    assert!(!report.errors.contains_key("frontend"));
}

#[tokio::test(start_paused = true)]
async fn start_is_rejected_per_service_while_busy() {
    let stack = Stack::started(new_test_config()).await;

    let _held = stack.registry.begin("frontend", "scale").unwrap();
    let report = stack.start().await;

    assert_eq!(report.phase("db"), Some(StartupPhase::Ready));
    assert_eq!(report.phase("backend"), Some(StartupPhase::Ready));
    assert_eq!(report.phase("frontend"), Some(StartupPhase::Failed));
    assert!(report.errors["frontend"].contains("busy"), "{:?}", report.errors);
}

#[tokio::test(start_paused = true)]
async fn restart_keeps_running_replicas() {
    let stack = Stack::started(new_test_config()).await;
    let before = stack.registry.snapshot("backend").unwrap().replicas;

    let report = stack.start().await;

    assert!(report.is_ready());
    let after = stack.registry.snapshot("backend").unwrap().replicas;
    assert_eq!(before, after);
}
