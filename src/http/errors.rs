use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::errors::{AuthError, HttpError, StorageError, TaskError};

/// Problem reported to API clients.
///
/// Every internal failure collapses into one of these, so clients always see
/// the same `{"message", "code"}` shape whichever component failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    TaskNotFound,
    InternalServerError,
    IdsUnavailableProblem,
    NoTesInstancesAvailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound | ApiError::TaskNotFound => StatusCode::NOT_FOUND,
            ApiError::InternalServerError
            | ApiError::IdsUnavailableProblem
            | ApiError::NoTesInstancesAvailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ApiError::BadRequest => "The request is malformed.",
            ApiError::Unauthorized => "The request is unauthorized.",
            ApiError::Forbidden => "The requester is not authorized to perform this action.",
            ApiError::NotFound => "The requested resource wasn't found.",
            ApiError::TaskNotFound => "The requested task wasn't found.",
            ApiError::InternalServerError => "An unexpected error occurred.",
            ApiError::IdsUnavailableProblem => "No/few unique task identifiers available.",
            ApiError::NoTesInstancesAvailable => "No TES instances available.",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(json!({
                "message": self.message(),
                "code": status.as_u16(),
            })),
        )
            .into_response()
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::BadRequest { .. } | TaskError::InvalidView { .. } => {
                tracing::debug!(error = %err, "Rejecting malformed request");
                ApiError::BadRequest
            }
            TaskError::TaskNotFound { .. } => ApiError::TaskNotFound,
            TaskError::IdsUnavailable { .. } => {
                tracing::error!(error = %err, "Task identifier space exhausted");
                ApiError::IdsUnavailableProblem
            }
            TaskError::NoTesInstancesAvailable { .. } => ApiError::NoTesInstancesAvailable,
            TaskError::Storage(e) => e.into(),
            TaskError::Middleware(_)
            | TaskError::EnqueueFailed { .. }
            | TaskError::SubmissionAborted { .. } => {
                tracing::error!(error = %err, "Unhandled task error");
                ApiError::InternalServerError
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Storage error");
        ApiError::InternalServerError
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::debug!(error = %err, "Authorization failed");
        match err {
            AuthError::MissingClaim { .. } => ApiError::Forbidden,
            AuthError::MissingHeader { .. }
            | AuthError::MalformedHeader { .. }
            | AuthError::TokenValidationFailed { .. } => ApiError::Unauthorized,
        }
    }
}

impl From<HttpError> for ApiError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::BadRequest { .. } => ApiError::BadRequest,
            HttpError::Unauthorized { .. } => ApiError::Unauthorized,
            HttpError::Forbidden { .. } => ApiError::Forbidden,
            HttpError::NotFound { .. } => ApiError::NotFound,
            HttpError::Unhandled { details } => {
                tracing::error!(details = ?details, "Unhandled error");
                ApiError::InternalServerError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_errors_map_to_problems() {
        assert_eq!(
            ApiError::from(TaskError::TaskNotFound {
                task_id: "X".to_string()
            }),
            ApiError::TaskNotFound
        );
        assert_eq!(
            ApiError::from(TaskError::InvalidView {
                view: "LARGE".to_string()
            }),
            ApiError::BadRequest
        );
        assert_eq!(
            ApiError::from(TaskError::IdsUnavailable { attempts: 10 }),
            ApiError::IdsUnavailableProblem
        );
        assert_eq!(
            ApiError::from(TaskError::Storage(StorageError::SchemaMismatch {
                details: "x".to_string()
            })),
            ApiError::InternalServerError
        );
    }

    #[test]
    fn test_codes_match_status() {
        for problem in [
            ApiError::BadRequest,
            ApiError::Unauthorized,
            ApiError::Forbidden,
            ApiError::NotFound,
            ApiError::TaskNotFound,
            ApiError::InternalServerError,
            ApiError::IdsUnavailableProblem,
            ApiError::NoTesInstancesAvailable,
        ] {
            assert_eq!(problem.into_response().status(), problem.status());
        }
        assert_eq!(ApiError::TaskNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::NoTesInstancesAvailable.message(),
            "No TES instances available."
        );
    }
}
