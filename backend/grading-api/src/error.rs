use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy shared by every grading operation.
///
/// Each variant maps to a stable machine-readable code; storage-level details never leak
/// past [`GradingError::Internal`].
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Cannot transition from \"{from}\" to \"{to}\"")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type GradingResult<T> = Result<T, GradingError>;

impl GradingError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        GradingError::NotFound(entity.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        GradingError::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        GradingError::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        GradingError::Forbidden(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            GradingError::NotFound(_) => "NOT_FOUND",
            GradingError::BadRequest(_) => "BAD_REQUEST",
            GradingError::Conflict(_) => "CONFLICT",
            // Same code as Conflict; the message names both states.
            GradingError::InvalidTransition { .. } => "CONFLICT",
            GradingError::Unauthorized(_) => "UNAUTHORIZED",
            GradingError::Forbidden(_) => "FORBIDDEN",
            GradingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GradingError::NotFound(_) => StatusCode::NOT_FOUND,
            GradingError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // An illegal lifecycle move means the entity is in the wrong state.
            GradingError::Conflict(_) | GradingError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            GradingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GradingError::Forbidden(_) => StatusCode::FORBIDDEN,
            GradingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GradingError::Conflict(_) | GradingError::InvalidTransition { .. }
        )
    }
}

/// Errors raised by storage adapters. Write conflicts and uniqueness violations are kept
/// apart from plain backend failures so callers can answer with `Conflict`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        if is_duplicate_key(&err) {
            return StoreError::Conflict("duplicate key".to_string());
        }
        if err.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
            return StoreError::Conflict(err.to_string());
        }
        StoreError::Backend(anyhow::Error::new(err))
    }
}

impl From<StoreError> for GradingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => GradingError::Conflict(format!(
                "Submission was modified concurrently ({})",
                message
            )),
            StoreError::Backend(err) => GradingError::Internal(err),
        }
    }
}

/// MongoDB duplicate key (E11000).
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref we)) => we.code == 11000,
        ErrorKind::Command(ref ce) => ce.code == 11000,
        _ => false,
    }
}

impl IntoResponse for GradingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            GradingError::Internal(err) => {
                tracing::error!(error = %err, "Internal grading error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "requestId": Uuid::new_v4().to_string(),
            "error": {
                "code": self.code(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}
