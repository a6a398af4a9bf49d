//! Ingestion processor
//!
//! Core logic for populating the knowledge base: source extraction,
//! chunking, image description, embedding and collection upsert.

use crate::chunker::chunk_text;
use crate::errors::IngestionError;
use crate::extractor::{ExtractedPage, SourceExtractor};
use docfill_common::config::IngestionConfig;
use docfill_common::embeddings::Embedder;
use docfill_common::errors::AppError;
use docfill_common::generation::{Generator, ImageInput};
use docfill_common::metrics;
use docfill_common::sources::{SourceCatalog, SourceRecord};
use docfill_search::{ChunkKind, ChunkRecord, CollectionBackend};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const IMAGE_PROMPT: &str =
    "Please describe this image in at most 200 words, focusing on key details and semantic meaning.";

pub const IMAGE_FALLBACK: &str = "[Description unavailable due to API error]";

/// A chunk before embedding
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChunk {
    pub page: String,
    pub kind: ChunkKind,
    pub text: String,
}

/// Content-addressed chunk id
pub fn chunk_id(source_id: &str, page: &str, kind: ChunkKind, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0]);
    hasher.update(page.as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(index.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Ingestion processor
pub struct IngestionProcessor {
    extractor: Arc<dyn SourceExtractor>,
    generator: Arc<dyn Generator>,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn CollectionBackend>,
    catalog: Arc<dyn SourceCatalog>,
    config: IngestionConfig,
}

impl IngestionProcessor {
    pub fn new(
        extractor: Arc<dyn SourceExtractor>,
        generator: Arc<dyn Generator>,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn CollectionBackend>,
        catalog: Arc<dyn SourceCatalog>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            extractor,
            generator,
            embedder,
            backend,
            catalog,
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn SourceCatalog> {
        &self.catalog
    }

    /// Ingest one source file into a fresh collection and register it
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn ingest(&self, filename: &str, bytes: Vec<u8>) -> Result<SourceRecord, IngestionError> {
        if self
            .catalog
            .list()
            .await?
            .iter()
            .any(|r| r.filename == filename)
        {
            return Err(AppError::Duplicate {
                message: format!(
                    "A source named '{}' already exists. Delete it or rename the upload.",
                    filename
                ),
            }
            .into());
        }

        let mut record = SourceRecord::new(filename);

        info!(source_id = %record.id, "Extracting source");
        let extractor = self.extractor.clone();
        let name = filename.to_string();
        let pages = tokio::task::spawn_blocking(move || extractor.extract(&name, &bytes))
            .await
            .map_err(|e| AppError::Internal {
                message: format!("extraction task failed: {}", e),
            })??;

        let pending = self.build_chunks(&pages).await?;
        info!(source_id = %record.id, chunk_count = pending.len(), "Chunks built");

        let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let records: Vec<ChunkRecord> = pending
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (chunk, embedding))| ChunkRecord {
                id: chunk_id(&record.id, &chunk.page, chunk.kind, index),
                source_id: record.id.clone(),
                text: chunk.text,
                kind: chunk.kind,
                page: chunk.page,
                embedding,
            })
            .collect();

        record.chunk_count = records.len();

        let collection = self.backend.open(record.collection_id()).await?;
        if let Err(e) = collection.upsert(records).await {
            if let Err(drop_err) = self.backend.drop_collection(record.collection_id()).await {
                warn!(source_id = %record.id, error = %drop_err, "Failed to drop partial collection");
            }
            return Err(e.into());
        }

        if let Err(e) = self.catalog.add(record.clone()).await {
            // Lost a race with a same-named upload
            self.backend.drop_collection(record.collection_id()).await?;
            return Err(e.into());
        }

        metrics::record_ingestion(record.chunk_count);
        info!(source_id = %record.id, chunk_count = record.chunk_count, "Source ingested");
        Ok(record)
    }

    /// Text chunks for every page, then image descriptions, then tables
    pub async fn build_chunks(&self, pages: &[ExtractedPage]) -> Result<Vec<PendingChunk>, IngestionError> {
        let mut chunks = Vec::new();

        for page in pages {
            for text in chunk_text(&page.text, &self.config)? {
                chunks.push(PendingChunk {
                    page: page.label.clone(),
                    kind: ChunkKind::Text,
                    text,
                });
            }
        }

        for page in pages {
            for image in &page.images {
                let input = ImageInput::new(image.mime.clone(), image.data.clone());
                let text = match self.generator.generate(IMAGE_PROMPT, Some(&input)).await {
                    Ok(desc) if !desc.trim().is_empty() => desc.trim().to_string(),
                    Ok(_) => IMAGE_FALLBACK.to_string(),
                    Err(e) => {
                        warn!(page = %page.label, image = %image.name, error = %e, "Image description failed");
                        IMAGE_FALLBACK.to_string()
                    }
                };
                chunks.push(PendingChunk {
                    page: page.label.clone(),
                    kind: ChunkKind::ImageDescription,
                    text,
                });
            }
        }

        for page in pages {
            for table in page.tables.iter().filter(|t| !t.markdown.trim().is_empty()) {
                chunks.push(PendingChunk {
                    page: page.label.clone(),
                    kind: ChunkKind::Table,
                    text: table.markdown.clone(),
                });
            }
        }

        Ok(chunks)
    }

    /// Drop a source's collection, then forget the source
    #[instrument(skip(self))]
    pub async fn delete(&self, source_id: &str) -> Result<SourceRecord, IngestionError> {
        let record = self
            .catalog
            .get(source_id)
            .await?
            .ok_or_else(|| AppError::not_found("Source", source_id))?;

        self.backend.drop_collection(record.collection_id()).await?;
        self.catalog.remove(source_id).await?;

        info!(source_id, "Source deleted");
        Ok(record)
    }

    /// Delete every source. Returns how many were removed.
    pub async fn delete_all(&self) -> Result<usize, IngestionError> {
        let records = self.catalog.list().await?;
        for record in &records {
            self.backend.drop_collection(record.collection_id()).await?;
        }
        self.catalog.remove_all().await?;

        info!(count = records.len(), "All sources deleted");
        Ok(records.len())
    }
}
