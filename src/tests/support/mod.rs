// Shared test support code for integration tests.

pub mod common;
pub mod harness;

pub use common::*;
pub use harness::Stack;
