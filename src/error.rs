//! The `StorageError` taxonomy and its HTTP rendering.
//!
//! Every fallible operation in this crate returns `StorageError`. The two HTTP
//! planes turn it into a JSON problem document; nothing downstream of a Volume
//! call is allowed to invent its own ad-hoc error shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid API parameters: {0}")]
    InvalidApiParameters(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unknown volume: {0}")]
    InvalidVolume(String),

    #[error("vfolder not found: {0}")]
    VFolderNotFound(String),

    #[error("vfolder already exists: {0}")]
    VFolderAlreadyExists(String),

    #[error("failed to create vfolder: {0}")]
    VFolderCreationError(String),

    #[error("subprocess execution failed: {0}")]
    ExecutionError(String),

    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("payload too large: {0}")]
    TooLarge(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    fn status(&self) -> StatusCode {
        match self {
            StorageError::InvalidApiParameters(_) => StatusCode::BAD_REQUEST,
            StorageError::InvalidToken(_) => StatusCode::FORBIDDEN,
            StorageError::InvalidVolume(_) => StatusCode::BAD_REQUEST,
            StorageError::VFolderNotFound(_) => StatusCode::NOT_FOUND,
            StorageError::VFolderAlreadyExists(_) => StatusCode::CONFLICT,
            StorageError::VFolderCreationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::ExecutionError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Unsupported(_) => StatusCode::BAD_REQUEST,
            StorageError::TooLarge(_) => StatusCode::BAD_REQUEST,
            StorageError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StorageError::Io(err) => match err.kind() {
                std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                std::io::ErrorKind::AlreadyExists => StatusCode::CONFLICT,
                std::io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn problem_type(&self) -> &'static str {
        match self {
            StorageError::InvalidApiParameters(_) => "invalid-api-parameters",
            StorageError::InvalidToken(_) => "invalid-token",
            StorageError::InvalidVolume(_) => "invalid-volume",
            StorageError::VFolderNotFound(_) => "vfolder-not-found",
            StorageError::VFolderAlreadyExists(_) => "vfolder-already-exists",
            StorageError::VFolderCreationError(_) => "vfolder-creation-error",
            StorageError::ExecutionError(_) => "execution-error",
            StorageError::Unsupported(_) => "unsupported",
            StorageError::TooLarge(_) => "too-large",
            StorageError::Config(_) => "config-error",
            StorageError::Io(_) => "io-error",
        }
    }
}

/// `{type, title, data}` problem document shape, per the spec's error design.
#[derive(Serialize)]
struct ProblemDocument {
    #[serde(rename = "type")]
    kind: &'static str,
    title: String,
    data: serde_json::Value,
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(error = %self, status = %status, "request failed");
        let body = ProblemDocument {
            kind: self.problem_type(),
            title: self.to_string(),
            data: serde_json::Value::Null,
        };
        (status, axum::Json(body)).into_response()
    }
}
