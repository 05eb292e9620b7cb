// Error definitions for liveness probe

#[derive(Debug, Clone, thiserror::Error)]
#[error("liveness probe timeout is too short")]
pub struct TimeoutIsTooShortError;
