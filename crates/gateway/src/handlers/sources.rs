//! Source document handlers
//!
//! Uploading a source builds its collection; deleting it drops the collection.

use crate::AppState;
use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use docfill_common::errors::{AppError, Result};
use docfill_common::sources::SourceCatalog;
use serde::Serialize;

#[derive(Serialize)]
pub struct UploadedSource {
    pub filename: String,
    pub file_uuid: String,
}

#[derive(Serialize)]
pub struct SourceSummary {
    pub pdf_file_name: String,
    pub pdf_uuid: String,
    pub chunk_count: usize,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn upload_error(e: impl ToString) -> AppError {
    AppError::Validation {
        message: e.to_string(),
        field: Some("files".to_string()),
    }
}

/// Ingest every `files` part of a multipart upload
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedSource>>> {
    let mut uploaded = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| upload_error("file part is missing a filename"))?;
        let bytes = field.bytes().await.map_err(upload_error)?;

        let record = state.ingestion.ingest(&filename, bytes.to_vec()).await?;
        tracing::info!(source_id = %record.id, filename = %filename, chunks = record.chunk_count, "Source uploaded");

        uploaded.push(UploadedSource {
            filename,
            file_uuid: record.id,
        });
    }

    if uploaded.is_empty() {
        return Err(upload_error("no files were uploaded"));
    }
    Ok(Json(uploaded))
}

/// All registered sources, oldest first
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<SourceSummary>>> {
    let sources = state.ingestion.catalog().list().await?;
    Ok(Json(
        sources
            .into_iter()
            .map(|s| SourceSummary {
                pdf_file_name: s.filename,
                pdf_uuid: s.id,
                chunk_count: s.chunk_count,
            })
            .collect(),
    ))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> Result<Json<MessageResponse>> {
    state.ingestion.delete(&source_id).await?;
    Ok(Json(MessageResponse {
        message: format!("Source '{}' and its embeddings deleted successfully.", source_id),
    }))
}

pub async fn delete_all(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    let count = state.ingestion.delete_all().await?;
    Ok(Json(MessageResponse {
        message: format!("All {} source(s) and their embeddings deleted successfully.", count),
    }))
}
