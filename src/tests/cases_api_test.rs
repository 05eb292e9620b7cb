// Operator HTTP API: routing, payloads and error-to-status mapping.

use axum::http::{Method, StatusCode};
use std::time::Duration;

use crate::config::new_test_config;
use crate::tests::support::{call, get_text, Stack};

#[tokio::test(start_paused = true)]
async fn status_lists_every_service() {
    let stack = Stack::default_stack();
    let router = stack.router();

    let (status, body) = call(&router, Method::GET, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 3);
    for name in ["db", "backend", "frontend"] {
        assert!(names.contains(&name), "{names:?}");
    }

    let (status, body) = call(&router, Method::GET, "/api/v1/status/backend").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["desired_replicas"], 3);
    assert_eq!(body["depends_on"][0], "db");
    assert_eq!(body["startup"], "pending");

    let (status, body) = call(&router, Method::GET, "/api/v1/status/cache").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert_eq!(body["status"], "unknown_service");
}

#[tokio::test(start_paused = true)]
async fn start_and_scale_through_api() {
    let stack = Stack::default_stack();
    stack.watch();
    let router = stack.router();

    let (status, body) = call(&router, Method::POST, "/api/v1/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true, "{body}");
    assert_eq!(body["status"], "ready");
    assert_eq!(body["result"]["order"][0], "db");

    stack.settle("backend").await;
    let (status, body) = call(&router, Method::POST, "/api/v1/services/backend/scale?to=4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true, "{body}");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"]["reached"], 4);
    assert_eq!(stack.orchestrator.replicas("backend").len(), 4);
}

#[tokio::test(start_paused = true)]
async fn rejected_commands_map_to_client_errors() {
    let stack = Stack::started(new_test_config()).await;
    let router = stack.router();

    let (status, body) = call(&router, Method::POST, "/api/v1/services/backend/scale?to=99").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "bounds");
    assert!(body["error"].as_str().unwrap().contains("[1, 6]"), "{body}");

    let (status, body) = call(&router, Method::POST, "/api/v1/services/backend/rollback").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "no_previous_version");

    let (status, _) = call(&router, Method::POST, "/api/v1/services/backend/scale").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(&router, Method::POST, "/api/v1/services/cache/rollout?version=v2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "unknown_service");

    let (status, body) = call(&router, Method::POST, "/api/v1/services/backend/rollout?version=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_request");
    assert_eq!(stack.versions("backend"), vec!["v1", "v1", "v1"]);
    assert!(stack.orchestrator.calls_for("backend").iter().all(|c| !c.starts_with("start_replica")));
}

#[tokio::test(start_paused = true)]
async fn rollout_failure_is_reported_in_body() {
    let stack = Stack::started(new_test_config()).await;
    stack.orchestrator.never_ready_version("backend", "v2");
    let router = stack.router();

    let (status, body) = call(&router, Method::POST, "/api/v1/services/backend/rollout?version=v2&batch=1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["status"], "rolled_back");
    assert_eq!(body["result"]["batches_completed"], 0);
    assert_eq!(stack.versions("backend"), vec!["v1", "v1", "v1"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_without_operation_is_idle() {
    let stack = Stack::default_stack();
    let router = stack.router();

    let (status, body) = call(&router, Method::POST, "/api/v1/services/frontend/cancel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["status"], "idle");
}

#[tokio::test(start_paused = true)]
async fn backup_run_is_accepted_once() {
    let stack = Stack::default_stack();
    stack.orchestrator.set_job_duration(Duration::from_secs(120));
    let router = stack.router();

    let (status, body) = call(&router, Method::POST, "/api/v1/backups/db-nightly/run").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["result"]["job"], "db-nightly");

    let (status, body) = call(&router, Method::POST, "/api/v1/backups/db-nightly/run").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "job_pending");

    let (status, body) = call(&router, Method::POST, "/api/v1/backups/wal/run").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "unknown_job");

    let (status, body) = call(&router, Method::GET, "/api/v1/backups").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["job"], "db-nightly");
    assert_eq!(body[0]["last_outcome"], "pending");
}

#[tokio::test(start_paused = true)]
async fn probe_and_metrics_endpoints_answer() {
    let stack = Stack::default_stack();
    let router = stack.router();

    let (status, body) = call(&router, Method::GET, "/k8s/probe").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");

    let (status, text) = get_text(&router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.starts_with('#') || text.is_empty() || text.contains("stackctl_"), "{text}");
}
