use super::{
    Api, BackupJobSpec, Backups, ControllerBox, Health, Logs, OrchestratorCfg, OrchestratorKind,
    Probe, Rollout, Scaler, ServiceSpec, Stack, Startup, K8S,
};
use std::collections::BTreeMap;
use std::time::Duration;

fn service(version: &str, replicas: usize, min: usize, max: usize, depends_on: &[&str]) -> ServiceSpec {
    ServiceSpec {
        image: None,
        version: version.to_string(),
        replicas,
        min: Some(min),
        max: Some(max),
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        health: None,
    }
}

/// Creates the three-tier test topology `db -> backend -> frontend` on the
/// in-memory orchestrator, with one nightly backup job against `db`.
pub fn new_test_config() -> Stack {
    let mut services = BTreeMap::new();
    services.insert("db".to_string(), service("15.4", 1, 1, 1, &[]));
    services.insert("backend".to_string(), service("v1", 3, 1, 6, &["db"]));
    services.insert("frontend".to_string(), service("v1", 2, 0, 4, &["backend"]));

    Stack {
        controller: ControllerBox {
            env: super::TEST.to_string(),
            logs: Some(Logs {
                level: Some("debug".to_string()),
            }),
            api: Some(Api {
                name: Some("stackctl:8040".to_string()),
                port: Some("8040".to_string()),
                timeout: Some(Duration::from_secs(600)),
            }),
            k8s: Some(K8S {
                probe: Probe {
                    timeout: Some(Duration::from_secs(5)),
                },
            }),
            orchestrator: Some(OrchestratorCfg {
                kind: OrchestratorKind::Memory,
                command: None,
                network: None,
                label_prefix: None,
            }),
            health: Health::default(),
            startup: Startup::default(),
            rollout: Rollout::default(),
            scaler: Scaler::default(),
            backups: Some(Backups {
                tick: Duration::from_secs(1),
                poll_interval: Duration::from_secs(5),
                store_path: None,
                jobs: vec![BackupJobSpec {
                    name: "db-nightly".to_string(),
                    target: "db".to_string(),
                    schedule: "0 0 3 * * *".to_string(),
                    timeout: Duration::from_secs(30 * 60),
                    command: vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        "pg_dump -U app app > /backups/app.sql".to_string(),
                    ],
                }],
            }),
            services,
        },
    }
}
