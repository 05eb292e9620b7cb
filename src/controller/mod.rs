// HTTP API controllers for the operator surface.

pub mod backups;
pub mod controller;
pub mod metrics;
pub mod probe;
pub mod reply;
pub mod services;
pub mod startup;
pub mod status;

pub use backups::BackupsController;
pub use metrics::PrometheusMetricsController;
pub use probe::LivenessProbeController;
pub use services::ServiceCommandsController;
pub use startup::StartController;
pub use status::StatusController;
