//! Maps [`CoreError`] onto HTTP status codes and a `{error,message}` body
//! (§7's error handling design).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use delegator_core::{CoreError, EntityKind};

pub struct AppError(pub CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = status_and_label(&self.0);
        let body = Json(serde_json::json!({
            "error": error,
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

fn status_and_label(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::ValidationFailure(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failure"),
        CoreError::NotFound(EntityKind::Task, _) => (StatusCode::NOT_FOUND, "task_not_found"),
        CoreError::NotFound(EntityKind::Orchestration, _) => {
            (StatusCode::NOT_FOUND, "orchestration_not_found")
        }
        CoreError::NotTerminal(_, _) => (StatusCode::BAD_REQUEST, "not_terminal"),
        CoreError::CycleDetected(_) => (StatusCode::BAD_REQUEST, "cycle_detected"),
        CoreError::InvalidDependency(_) => (StatusCode::BAD_REQUEST, "invalid_dependency"),
        CoreError::DuplicateIdentifier(_) => (StatusCode::BAD_REQUEST, "duplicate_identifier"),
        CoreError::StoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable"),
        CoreError::AdapterTransient(_) => (StatusCode::INTERNAL_SERVER_ERROR, "adapter_transient"),
        CoreError::AdapterPermanent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "adapter_permanent"),
        CoreError::ExecutorCrash(_) => (StatusCode::INTERNAL_SERVER_ERROR, "executor_crash"),
        CoreError::OrchestratorCrash(_) => (StatusCode::INTERNAL_SERVER_ERROR, "orchestrator_crash"),
    }
}
