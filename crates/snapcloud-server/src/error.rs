//! Error types for the Snap!Cloud server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use snapcloud_storage::StorageError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Blobs written by a save could not be read back.
    #[error("Incomplete save of project {project_id}: {missing} could not be read back")]
    IncompleteSave { project_id: i64, missing: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts a catalog error, reporting unique-constraint races as a conflict.
    pub fn from_catalog(err: sqlx::Error, conflict: impl Into<String>) -> Self {
        let is_unique_violation = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);

        if is_unique_violation {
            let message = conflict.into();
            tracing::warn!(error = %err, "integrity violation: {}", message);
            AppError::Conflict(message)
        } else {
            AppError::Database(err)
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::Storage(StorageError::InvalidDelta(delta)) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid delta {delta}: expected 0, -1 or -2"),
            )
                .into_response(),
            AppError::Storage(StorageError::UnknownArtifact(name)) => {
                (StatusCode::NOT_FOUND, format!("Unknown artifact '{name}'")).into_response()
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            AppError::IncompleteSave { project_id, missing } => {
                tracing::error!(project_id, missing = %missing, "Incomplete project save");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Project save was incomplete, please save again",
                )
                    .into_response()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
