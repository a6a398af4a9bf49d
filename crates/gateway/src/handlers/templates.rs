//! Template filling handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use docfill_common::{
    errors::{AppError, Result},
    models::{FileStatus, Task, TaskStatus},
};
use docfill_filler::{templates::validate_name, FillRequest, TemplateRepository};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to fill every template in a folder
#[derive(Debug, Deserialize, Validate)]
pub struct FillTemplateRequest {
    #[validate(length(min = 1, max = 255))]
    pub folder_name: String,

    #[serde(default)]
    pub user_prompt: Option<String>,

    /// Process-flow diagram as base64 or a `data:` URL
    #[serde(default)]
    pub process_flow: Option<String>,

    #[serde(default)]
    pub selected_files: Option<Vec<String>>,
}

#[derive(Serialize)]
pub struct FillTemplateResponse {
    pub task_id: String,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub file_name: String,
    pub status: FileStatus,
    pub download_url: Option<String>,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub files_done: usize,
    pub files_total: usize,
    pub generated_files: Vec<GeneratedFile>,
}

impl From<Task> for ProgressResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            files_done: task.files_done,
            files_total: task.files_total,
            generated_files: task
                .results
                .into_iter()
                .map(|r| GeneratedFile {
                    file_name: r.filename,
                    status: r.status,
                    download_url: r.download_reference,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct TemplateListResponse {
    pub folder_name: String,
    pub templates: Vec<String>,
}

/// Start a background filling task
pub async fn fill_templates(
    State(state): State<AppState>,
    Json(request): Json<FillTemplateRequest>,
) -> Result<(StatusCode, Json<FillTemplateResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("folder_name".to_string()),
    })?;

    let task_id = state
        .orchestrator
        .create_task(FillRequest {
            folder: request.folder_name,
            user_prompt: request.user_prompt,
            process_flow: request.process_flow,
            selected_files: request.selected_files,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FillTemplateResponse {
            task_id,
            message: "Template processing started".to_string(),
        }),
    ))
}

/// Current snapshot of a task
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ProgressResponse>> {
    let task = state.orchestrator.progress(&task_id).await?;
    Ok(Json(task.into()))
}

/// Serve a generated artifact
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    validate_name("artifact", &filename)?;
    let bytes = state.orchestrator.templates().read_artifact(&filename).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Template names available in a folder
pub async fn list_templates(
    State(state): State<AppState>,
    Path(folder): Path<String>,
) -> Result<Json<TemplateListResponse>> {
    validate_name("folder", &folder)?;
    let templates = state.orchestrator.templates().list_templates(&folder).await?;
    Ok(Json(TemplateListResponse {
        folder_name: folder,
        templates,
    }))
}
