use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::api::ErrorBody;

/// Failure kinds produced by the quiz engine. The HTTP edge decides status codes.
#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No lessons were completed today")]
    NoEligibleContent,

    #[error("Quiz session '{0}' not found")]
    SessionNotFound(String),

    #[error("Submitted {received} answers but the session has {expected} questions")]
    AnswerCountMismatch { expected: usize, received: usize },

    #[error("Quiz session '{0}' has already been graded")]
    AlreadyGraded(Uuid),

    #[error("Quiz generation failed: {0}")]
    GenerationFailed(#[source] anyhow::Error),

    #[error("Quiz grading failed: {0}")]
    GradingFailed(#[source] anyhow::Error),
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(self, context: ErrorContext) -> (StatusCode, Json<ErrorBody>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ErrorBody::new(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::ValidationError(message) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Validation error"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorBody::new(
                        context.user_friendly_message.unwrap_or_else(|| message.clone()),
                    )),
                )
            }
            ApiError::Conflict(message) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Conflicting request"
                );
                (StatusCode::CONFLICT, Json(ErrorBody::new(message.clone())))
            }
            ApiError::Unauthorized(message) => {
                warn!(operation = %context.operation, error = %self, "Unauthenticated request");
                (StatusCode::UNAUTHORIZED, Json(ErrorBody::new(message.clone())))
            }
            ApiError::Forbidden(message) => {
                warn!(operation = %context.operation, error = %self, "Rejected credentials");
                (StatusCode::FORBIDDEN, Json(ErrorBody::new(message.clone())))
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody::new(context.user_friendly_message.unwrap_or_else(|| {
                        "Database operation failed. Please try again.".to_string()
                    }))),
                )
            }
        }
    }
}

impl From<QuizError> for ApiError {
    fn from(err: QuizError) -> Self {
        match err {
            QuizError::InvalidRequest(_)
            | QuizError::NoEligibleContent
            | QuizError::AnswerCountMismatch { .. } => ApiError::ValidationError(err.to_string()),
            QuizError::SessionNotFound(_) => ApiError::NotFound(err.to_string()),
            QuizError::AlreadyGraded(_) => ApiError::Conflict(err.to_string()),
            QuizError::GenerationFailed(source) | QuizError::GradingFailed(source) => {
                ApiError::DatabaseError(source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("check_quiz", "quiz_session")
            .with_id("123")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "check_quiz");
        assert_eq!(context.resource_type, "quiz_session");
        assert_eq!(context.resource_id, Some("123".to_string()));
        assert_eq!(context.user_friendly_message, Some("Custom message".to_string()));
    }

    #[test]
    fn test_quiz_errors_map_to_status_codes() {
        let cases = vec![
            (QuizError::InvalidRequest("answers missing".into()), StatusCode::BAD_REQUEST),
            (QuizError::NoEligibleContent, StatusCode::BAD_REQUEST),
            (
                QuizError::AnswerCountMismatch { expected: 5, received: 4 },
                StatusCode::BAD_REQUEST,
            ),
            (QuizError::SessionNotFound("abc".into()), StatusCode::NOT_FOUND),
            (QuizError::AlreadyGraded(Uuid::new_v4()), StatusCode::CONFLICT),
            (
                QuizError::GenerationFailed(anyhow::anyhow!("disk I/O error")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                QuizError::GradingFailed(anyhow::anyhow!("database is locked")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (quiz_error, expected) in cases {
            let context = ErrorContext::new("test", "quiz");
            let (status, _) = ApiError::from(quiz_error).to_response_with_context(context);
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_store_failures_hide_internal_message() {
        let error = ApiError::from(QuizError::GradingFailed(anyhow::anyhow!("UNIQUE constraint failed: secret")));
        let context = ErrorContext::new("check_quiz", "quiz_session").with_user_message("Grading failed");
        let (status, Json(body)) = error.to_response_with_context(context);

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.success);
        assert_eq!(body.message, "Grading failed");
    }
}
