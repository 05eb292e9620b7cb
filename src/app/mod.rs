// Controller application wiring.

pub mod app;

pub use app::App;
