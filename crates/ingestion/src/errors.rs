//! Ingestion error types

use docfill_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Could not parse {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("No content extracted from {0}")]
    Empty(String),

    #[error("Chunking error: {0}")]
    Chunking(String),

    #[error(transparent)]
    App(#[from] AppError),
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Parse { .. } | IngestionError::Empty(_) => AppError::Validation {
                message: e.to_string(),
                field: Some("files".to_string()),
            },
            IngestionError::Chunking(message) => AppError::Internal { message },
            IngestionError::App(inner) => inner,
        }
    }
}
