// HTTP controller trait for route registration.

use axum::Router;

/// A group of routes mounted on the operator API.
pub trait Controller: Send + Sync {
    /// Returns `router` with this controller's routes added.
    ///
    /// ```rust
    /// # use axum::{Router, routing::get};
    /// # async fn handler() -> &'static str { "ok" }
    /// let router: Router<()> = Router::new().route("/api/v1/status", get(handler));
    /// # let _ = router;
    /// ```
    fn add_route(&self, router: Router) -> Router;
}
