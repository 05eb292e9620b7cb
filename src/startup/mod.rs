//! Dependency-ordered startup.

pub mod sequencer;

pub use sequencer::{StartupReport, StartupSequencer};
