// JSON replies and error-to-status mapping shared by API controllers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ControllerError;

const JSON: &str = "application/json; charset=utf-8";

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    ok: bool,
    status: &'static str,
    error: &'a str,
}

/// HTTP status for a failed command.
pub fn status_of(err: &ControllerError) -> StatusCode {
    match err {
        ControllerError::Bounds { .. }
        | ControllerError::DependencyGuard { .. }
        | ControllerError::DependencyDown { .. }
        | ControllerError::NoPreviousVersion(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControllerError::Busy { .. }
        | ControllerError::JobAlreadyPending(_)
        | ControllerError::Cancelled(_) => StatusCode::CONFLICT,
        ControllerError::UnknownService(_) | ControllerError::UnknownJob(_) => StatusCode::NOT_FOUND,
        ControllerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ControllerError::Orchestrator(_) => StatusCode::BAD_GATEWAY,
        ControllerError::Cycle { .. }
        | ControllerError::Config(_)
        | ControllerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ControllerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(text) => (status, [("content-type", JSON)], text).into_response(),
        Err(e) => {
            warn!(component = "api", error = %e, "cannot encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn error(err: &ControllerError) -> Response {
    let status = status_of(err);
    if err.is_rejection() {
        debug!(component = "api", kind = err.kind(), error = %err, "command rejected");
    } else if status.is_server_error() {
        warn!(component = "api", kind = err.kind(), error = %err, "command failed");
    }
    let message = err.to_string();
    json(
        status,
        &ErrorBody {
            ok: false,
            status: err.kind(),
            error: &message,
        },
    )
}

/// Renders `Ok` with 200 and `Err` through `error`.
pub fn result<T: Serialize>(res: Result<T, ControllerError>) -> Response {
    match res {
        Ok(body) => json(StatusCode::OK, &body),
        Err(e) => error(&e),
    }
}
