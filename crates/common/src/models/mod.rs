//! Task and file-result types shared by the orchestrator, stores and gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a filling task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Completed and error are final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// Outcome of one template file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Done,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Done => "done",
            FileStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileResult {
    pub filename: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_reference: Option<String>,
}

impl FileResult {
    pub fn done(filename: impl Into<String>, download_reference: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Done,
            download_reference: Some(download_reference.into()),
        }
    }

    pub fn failed(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Error,
            download_reference: None,
        }
    }
}

/// Snapshot of a filling task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub files_total: usize,
    pub files_done: usize,
    pub results: Vec<FileResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Fresh task in `processing` with no files resolved yet
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Processing,
            files_total: 0,
            files_done: 0,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a file outcome. Only successful files advance `files_done`.
    pub fn record(&mut self, result: FileResult) {
        if result.status == FileStatus::Done {
            self.files_done = (self.files_done + 1).min(self.files_total);
        }
        self.results.push(result);
        self.updated_at = Utc::now();
    }

    /// Move to a terminal state. Returns false if the task already left `processing`.
    pub fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}
