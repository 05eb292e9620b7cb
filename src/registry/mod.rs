//! Service Registry: the single store of mutable per-service state.

pub mod events;
pub mod registry;

#[cfg(test)]
mod registry_test;

pub use events::{log_events, ControllerEvent};
pub use registry::{OperationGuard, Registry};
