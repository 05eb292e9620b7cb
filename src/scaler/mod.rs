//! Replica scaling inside configured bounds.

pub mod scaler;

pub use scaler::{ScaleOutcome, ScaleResult, Scaler};
