//! Staged rollouts with automatic rollback.

pub mod manager;
pub mod plan;


pub use manager::{RolloutManager, RolloutOutcome, RolloutResult};
pub use plan::RolloutPlan;
