//! Template and artifact storage
//!
//! Templates live in `{input_dir}/{folder}/*.{ext}`; filled artifacts are
//! written flat into `generated_dir`.

use async_trait::async_trait;
use docfill_common::config::StorageConfig;
use docfill_common::errors::{AppError, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Reject anything that could escape its directory
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(AppError::Validation {
            message: format!("invalid {} name '{}'", kind, name),
            field: Some(kind.to_string()),
        });
    }
    Ok(())
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn folder_exists(&self, folder: &str) -> Result<bool>;

    /// Template file names in `folder`, sorted
    async fn list_templates(&self, folder: &str) -> Result<Vec<String>>;

    async fn load(&self, folder: &str, name: &str) -> Result<Vec<u8>>;

    async fn save_artifact(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>>;
}

/// Filesystem-backed repository
#[derive(Debug, Clone)]
pub struct FsTemplateRepository {
    input_dir: PathBuf,
    generated_dir: PathBuf,
    extension: String,
}

impl FsTemplateRepository {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            input_dir: config.input_dir.clone(),
            generated_dir: config.generated_dir.clone(),
            extension: config.template_extension.trim_start_matches('.').to_string(),
        }
    }

    /// Create the artifact directory if needed
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.generated_dir)
            .await
            .map_err(|e| AppError::PersistenceFailure {
                message: format!("cannot create {}: {}", self.generated_dir.display(), e),
            })
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf> {
        validate_name("folder", folder)?;
        Ok(self.input_dir.join(folder))
    }
}

#[async_trait]
impl TemplateRepository for FsTemplateRepository {
    async fn folder_exists(&self, folder: &str) -> Result<bool> {
        let path = self.folder_path(folder)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_templates(&self, folder: &str) -> Result<Vec<String>> {
        let path = self.folder_path(folder)?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::not_found("Folder", folder));
            }
            Err(e) => return Err(e.into()),
        };

        let suffix = format!(".{}", self.extension);
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        debug!(folder, count = names.len(), "Templates listed");
        Ok(names)
    }

    async fn load(&self, folder: &str, name: &str) -> Result<Vec<u8>> {
        validate_name("template", name)?;
        let path = self.folder_path(folder)?.join(name);
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::not_found("Template", name),
            _ => e.into(),
        })
    }

    async fn save_artifact(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        validate_name("artifact", name)?;
        let path = self.generated_dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::PersistenceFailure {
                message: format!("cannot write {}: {}", path.display(), e),
            })
    }

    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>> {
        validate_name("artifact", name)?;
        let path = self.generated_dir.join(name);
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::not_found("File", name),
            _ => e.into(),
        })
    }
}

/// In-process repository for tests and demos
#[derive(Default)]
pub struct InMemoryTemplateRepository {
    folders: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_template(&self, folder: &str, name: &str, bytes: Vec<u8>) {
        self.folders
            .write()
            .await
            .entry(folder.to_string())
            .or_default()
            .insert(name.to_string(), bytes);
    }

    pub async fn artifact_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.artifacts.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn folder_exists(&self, folder: &str) -> Result<bool> {
        Ok(self.folders.read().await.contains_key(folder))
    }

    async fn list_templates(&self, folder: &str) -> Result<Vec<String>> {
        self.folders
            .read()
            .await
            .get(folder)
            .map(|files| files.keys().cloned().collect())
            .ok_or_else(|| AppError::not_found("Folder", folder))
    }

    async fn load(&self, folder: &str, name: &str) -> Result<Vec<u8>> {
        self.folders
            .read()
            .await
            .get(folder)
            .and_then(|files| files.get(name))
            .cloned()
            .ok_or_else(|| AppError::not_found("Template", name))
    }

    async fn save_artifact(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        validate_name("artifact", name)?;
        self.artifacts.write().await.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn read_artifact(&self, name: &str) -> Result<Vec<u8>> {
        self.artifacts
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::not_found("File", name))
    }
}
