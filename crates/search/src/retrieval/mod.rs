//! Multi-collection retrieval system
//!
//! Provides:
//! - Dense search (embedding similarity)
//! - Sparse search (lexical matching)
//! - Relative-score fusion of both modes, ranked across collections

mod engine;
mod fusion;
mod memory;
mod postgres;

pub use engine::FusionEngine;
pub use fusion::RelativeScoreFusion;
pub use memory::{MemoryBackend, MemoryCollection};
pub use postgres::{PgBackend, PgCollection};

use async_trait::async_trait;
use docfill_common::config::{RetrievalBackend, RetrievalConfig};
use docfill_common::db::DbPool;
use docfill_common::errors::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a chunk was made from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    ImageDescription,
    Table,
}

impl ChunkKind {
    /// Label used when rendering chunks into a prompt
    pub fn label(&self) -> &'static str {
        match self {
            ChunkKind::Text => "Document",
            ChunkKind::ImageDescription => "Image Description",
            ChunkKind::Table => "Table Data",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::ImageDescription => "image_description",
            ChunkKind::Table => "table",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ChunkKind::Text),
            "image_description" => Some(ChunkKind::ImageDescription),
            "table" => Some(ChunkKind::Table),
            _ => None,
        }
    }
}

/// A scored fragment returned by a query. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Stable identity within the collection
    pub id: String,
    pub source_id: String,
    pub text: String,
    pub kind: ChunkKind,
    pub score: f32,
}

impl Chunk {
    /// `"<label>: <text>"`
    pub fn render(&self) -> String {
        format!("{}: {}", self.kind.label(), self.text)
    }
}

/// A chunk as stored in a collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub source_id: String,
    pub text: String,
    pub kind: ChunkKind,
    /// Page or unit label the chunk came from
    pub page: String,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    pub fn to_chunk(&self, score: f32) -> Chunk {
        Chunk {
            id: self.id.clone(),
            source_id: self.source_id.clone(),
            text: self.text.clone(),
            kind: self.kind,
            score,
        }
    }
}

/// Retrieval mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Embedding similarity
    Dense,
    /// Lexical matching
    Sparse,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Dense => "dense",
            RetrievalMode::Sparse => "sparse",
        }
    }
}

/// Query text plus its embedding, computed once per search
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    /// Absent when the embedder failed; dense queries then fail
    pub embedding: Option<Vec<f32>>,
}

/// One source document's chunk store
#[async_trait]
pub trait Collection: Send + Sync {
    fn id(&self) -> &str;

    /// Insert or replace records by id
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()>;

    /// Up to `k` chunks ranked by the mode-local score, best first
    async fn query(&self, query: &SearchQuery, mode: RetrievalMode, k: usize) -> Result<Vec<Chunk>>;

    /// Remove every record
    async fn clear(&self) -> Result<()>;

    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn len(&self) -> Result<usize>;
}

/// Creates, finds and drops collections
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    /// Existing collection or a new empty one
    async fn open(&self, id: &str) -> Result<Arc<dyn Collection>>;

    /// Existing collection only
    async fn get(&self, id: &str) -> Result<Option<Arc<dyn Collection>>>;

    /// Remove a collection. Once this returns, queries against it yield nothing.
    async fn drop_collection(&self, id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// Build the backend selected by configuration. The postgres backend has its
/// schema created before it is returned.
pub async fn create_backend(
    config: &RetrievalConfig,
    db: Option<Arc<DbPool>>,
) -> Result<Arc<dyn CollectionBackend>> {
    match (config.backend, db) {
        (RetrievalBackend::Memory, _) => Ok(Arc::new(MemoryBackend::new())),
        (RetrievalBackend::Postgres, Some(db)) => {
            let backend = PgBackend::new(db);
            backend.ensure_schema().await?;
            Ok(Arc::new(backend))
        }
        (RetrievalBackend::Postgres, None) => Err(docfill_common::AppError::Configuration {
            message: "postgres retrieval backend needs a database pool".to_string(),
        }),
    }
}
