//! # File Storage Errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// File storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    // Validation errors
    #[error("Missing Content-Type header")]
    MissingContentType,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Content-Type mismatch: signed for {signed}, got {actual}")]
    ContentTypeMismatch { signed: String, actual: String },

    #[error("Invalid URL lifetime: {0}")]
    InvalidTtl(String),

    // Signed URL errors
    #[error("URL expired")]
    UrlExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    // Object errors
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Object already exists: {0}")]
    ObjectAlreadyExists(String),

    // I/O errors
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("No metadata recorded for {0}")]
    MetadataMissing(String),

    // Startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::MissingContentType => 400,
            StorageError::InvalidPath(_) => 400,
            StorageError::ContentTypeMismatch { .. } => 400,
            StorageError::InvalidTtl(_) => 400,
            StorageError::UrlExpired => 403,
            StorageError::InvalidSignature => 403,
            StorageError::ObjectNotFound(_) => 404,
            StorageError::ObjectAlreadyExists(_) => 409,
            StorageError::IoError(_) => 500,
            StorageError::MetadataMissing(_) => 500,
            StorageError::ConfigError(_) => 500,
            StorageError::Internal(_) => 500,
        }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::IoError(_))
    }

    pub(crate) fn io(context: &str, err: std::io::Error) -> Self {
        StorageError::IoError(format!("{}: {}", context, err))
    }
}

/// JSON error body returned by the HTTP handlers
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StorageError::MissingContentType.status_code(), 400);
        assert_eq!(StorageError::InvalidPath("../x".into()).status_code(), 400);
        assert_eq!(StorageError::InvalidTtl("-1s".into()).status_code(), 400);
        assert_eq!(StorageError::InvalidSignature.status_code(), 403);
        assert_eq!(StorageError::UrlExpired.status_code(), 403);
        assert_eq!(StorageError::ObjectAlreadyExists("k".into()).status_code(), 409);
        assert_eq!(StorageError::ObjectNotFound("k".into()).status_code(), 404);
        assert_eq!(StorageError::IoError("disk".into()).status_code(), 500);
    }

    #[test]
    fn test_only_io_is_transient() {
        assert!(StorageError::IoError("busy".into()).is_transient());
        assert!(!StorageError::InvalidSignature.is_transient());
        assert!(!StorageError::MetadataMissing("k".into()).is_transient());
    }

    #[test]
    fn test_into_response_status() {
        let response = StorageError::ObjectAlreadyExists("a/b.png".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
