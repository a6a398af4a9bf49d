//! Source document catalog
//!
//! Metadata for ingested source documents. Each source owns exactly one
//! retrieval collection, named by the source id.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            chunk_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Collection holding this source's chunks
    pub fn collection_id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// All sources, oldest first
    async fn list(&self) -> Result<Vec<SourceRecord>>;

    async fn get(&self, id: &str) -> Result<Option<SourceRecord>>;

    /// Register a source. Fails with `Duplicate` if the filename is taken.
    async fn add(&self, record: SourceRecord) -> Result<()>;

    /// Update an existing record in place
    async fn update(&self, record: SourceRecord) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<Option<SourceRecord>>;

    async fn remove_all(&self) -> Result<Vec<SourceRecord>>;
}

#[derive(Default)]
pub struct InMemorySourceCatalog {
    // Keyed by (created_at, id) so listing is in insertion order
    records: RwLock<BTreeMap<(DateTime<Utc>, String), SourceRecord>>,
}

impl InMemorySourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceCatalog for InMemorySourceCatalog {
    async fn list(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<SourceRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn add(&self, record: SourceRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.filename == record.filename) {
            return Err(AppError::Duplicate {
                message: format!("source '{}' already exists", record.filename),
            });
        }
        records.insert((record.created_at, record.id.clone()), record);
        Ok(())
    }

    async fn update(&self, record: SourceRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&(record.created_at, record.id.clone())) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(AppError::not_found("Source", record.id)),
        }
    }

    async fn remove(&self, id: &str) -> Result<Option<SourceRecord>> {
        let mut records = self.records.write().await;
        let key = records.iter().find(|(_, r)| r.id == id).map(|(k, _)| k.clone());
        Ok(key.and_then(|k| records.remove(&k)))
    }

    async fn remove_all(&self) -> Result<Vec<SourceRecord>> {
        let mut records = self.records.write().await;
        Ok(std::mem::take(&mut *records).into_values().collect())
    }
}
