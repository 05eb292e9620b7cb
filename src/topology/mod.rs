//! Static service dependency topology.

pub mod graph;


pub use graph::DependencyGraph;
