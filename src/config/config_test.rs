#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::{new_test_config, Config, ConfigTrait, OrchestratorKind};
    use crate::error::ControllerError;

    const SHIPPED: &str = include_str!("../../cfg/stackctl.cfg.yaml");

    const MINIMAL: &str = r#"
controller:
  env: "test"
  services:
    db:
      version: "15.4"
      replicas: 1
    backend:
      version: "v1"
      replicas: 2
      depends_on: ["db"]
"#;

    #[test]
    fn shipped_config_parses() {
        let cfg = Config::parse(SHIPPED).unwrap();

        assert_eq!(cfg.orchestrator().kind, OrchestratorKind::Docker);
        assert_eq!(cfg.services().len(), 3);
        assert!(cfg.startup().on_boot);
        assert_eq!(cfg.api().unwrap().timeout, Some(Duration::from_secs(15 * 60)));

        let backups = cfg.backups().unwrap();
        assert_eq!(backups.jobs.len(), 1);
        assert_eq!(backups.jobs[0].timeout, Duration::from_secs(30 * 60));

        let frontend = cfg.health_for("frontend");
        assert_eq!(frontend.interval, Duration::from_secs(1));
        assert_eq!(frontend.healthy_threshold, 3);
        assert_eq!(cfg.images()["backend"], "registry.local/app-backend");
    }

    #[test]
    fn omitted_sections_take_defaults() {
        let cfg = Config::parse(MINIMAL).unwrap();

        assert!(cfg.is_test());
        assert_eq!(cfg.orchestrator().kind, OrchestratorKind::Memory);
        assert_eq!(cfg.health().healthy_threshold, 3);
        assert_eq!(cfg.health().unhealthy_threshold, 2);
        assert_eq!(cfg.startup().timeout, Duration::from_secs(120));
        assert!(!cfg.startup().on_boot);
        assert_eq!(cfg.rollout().batch_size, 1);
        assert_eq!(cfg.rollout().batch_timeout, Duration::from_secs(60));
        assert!(cfg.backups().is_none());
        assert_eq!(cfg.service("backend").unwrap().bounds(), (0, 10));
        assert_eq!(cfg.images()["db"], "db");
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let mut cfg = new_test_config();
        cfg.controller
            .services
            .get_mut("db")
            .unwrap()
            .depends_on
            .push("frontend".to_string());

        match cfg.validate() {
            Err(ControllerError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"db".to_string()), "{path:?}");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut cfg = new_test_config();
        cfg.controller.services.get_mut("backend").unwrap().replicas = 9;
        assert!(matches!(cfg.validate(), Err(ControllerError::Config(_))));

        let mut cfg = new_test_config();
        cfg.controller.services.get_mut("frontend").unwrap().depends_on = vec!["cache".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = new_test_config();
        cfg.controller.backups.as_mut().unwrap().jobs[0].schedule = "every night".to_string();
        match cfg.validate() {
            Err(ControllerError::Config(msg)) => assert!(msg.contains("cron"), "{msg}"),
            other => panic!("unexpected result {other:?}"),
        }

        let mut cfg = new_test_config();
        cfg.controller.backups.as_mut().unwrap().jobs[0].target = "cache".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = new_test_config();
        cfg.controller.rollout.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(Config::parse("controller: [").is_err());
        assert!(Config::parse("controller:\n  env: test\n  services: {}\n").is_err());
    }
}
