//! Error types for docfill services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for each failure mode of the filling pipeline
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidDocumentStructure,

    // Resource errors (4xxx)
    SourceNotFound,

    // Conflict errors (5xxx)
    Conflict,

    // Storage errors (7xxx)
    DatabaseError,
    PersistenceFailure,
    CacheError,

    // External service errors (8xxx)
    UpstreamError,
    RetrievalFailure,
    GenerationFailure,
    EmbeddingError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    TaskFatal,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidDocumentStructure => 1002,

            ErrorCode::SourceNotFound => 4001,

            ErrorCode::Conflict => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::PersistenceFailure => 7002,
            ErrorCode::CacheError => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::RetrievalFailure => 8002,
            ErrorCode::GenerationFailure => 8003,
            ErrorCode::EmbeddingError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::TaskFatal => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid document structure: {message}")]
    InvalidDocumentStructure { message: String },

    // Resource errors
    #[error("{resource_type} not found: {id}")]
    SourceNotFound { resource_type: String, id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    // Collaborator errors
    #[error("Retrieval failed for collection {collection}: {message}")]
    RetrievalFailure { collection: String, message: String },

    #[error("Generation failed: {message}")]
    GenerationFailure { message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Persistence failed: {message}")]
    PersistenceFailure { message: String },

    #[error("Task failed: {message}")]
    TaskFatal { message: String },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a missing resource
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        AppError::SourceNotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Shorthand for a malformed document tree
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        AppError::InvalidDocumentStructure {
            message: message.into(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidDocumentStructure { .. } => ErrorCode::InvalidDocumentStructure,
            AppError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::RetrievalFailure { .. } => ErrorCode::RetrievalFailure,
            AppError::GenerationFailure { .. } => ErrorCode::GenerationFailure,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::PersistenceFailure { .. } => ErrorCode::PersistenceFailure,
            AppError::TaskFatal { .. } => ErrorCode::TaskFatal,
            AppError::Database(_) | AppError::DatabaseConnection { .. } => ErrorCode::DatabaseError,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidDocumentStructure { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            AppError::SourceNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::Duplicate { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::PersistenceFailure { .. }
            | AppError::TaskFatal { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::RetrievalFailure { .. }
            | AppError::GenerationFailure { .. }
            | AppError::EmbeddingError { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::CacheError { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::not_found("Task", "abc");
        assert_eq!(err.code(), ErrorCode::SourceNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Task not found: abc");
    }

    #[test]
    fn test_document_structure_is_client_error() {
        let err = AppError::invalid_structure("unknown paragraph 7");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_collaborator_errors_are_bad_gateway() {
        let err = AppError::GenerationFailure {
            message: "timeout".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code().as_code(), 8003);
    }

    #[test]
    fn test_task_fatal_is_server_error() {
        let err = AppError::TaskFatal {
            message: "input folder vanished".into(),
        };
        assert!(err.is_server_error());
    }
}
