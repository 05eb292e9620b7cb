//! Scenario tests for the controller.
//!
//! Each case drives real components against the in-memory orchestrator with
//! tokio's paused clock, so health debounce, batch and job timeouts elapse
//! in virtual time.

mod cases_api_test;
mod cases_backup_test;
mod cases_startup_test;

pub mod support;
