#[path = "k8s/probe/liveness/mod.rs"]
pub mod liveness;
#[cfg(test)]
mod tests;

pub mod app;
pub mod backup;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod rollout;
pub mod scaler;
pub mod shutdown;
pub mod startup;
pub mod topology;
