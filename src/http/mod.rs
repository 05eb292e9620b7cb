// HTTP module: operator API server.

pub mod server;

pub use server::{HttpServer, Server};

// Common controller interface
pub use crate::controller::controller::Controller;
