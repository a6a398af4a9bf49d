//! Cross-collection search
//!
//! Runs dense and sparse retrieval against every requested collection,
//! fuses each collection's pair, then ranks everything globally.

use super::{Chunk, CollectionBackend, RelativeScoreFusion, RetrievalMode, SearchQuery};
use docfill_common::config::RetrievalConfig;
use docfill_common::embeddings::Embedder;
use docfill_common::errors::{AppError, Result};
use docfill_common::metrics;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub struct FusionEngine {
    backend: Arc<dyn CollectionBackend>,
    embedder: Arc<dyn Embedder>,
    fusion: RelativeScoreFusion,
    /// Candidates per mode per collection
    k: usize,
    per_collection_top_k: Option<usize>,
}

impl FusionEngine {
    pub fn new(
        backend: Arc<dyn CollectionBackend>,
        embedder: Arc<dyn Embedder>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            fusion: RelativeScoreFusion::default(),
            k: config.k,
            per_collection_top_k: config.per_collection_top_k,
        }
    }

    /// Globally ranked chunks for `query` across `collection_ids`.
    ///
    /// Never fails: a collection that cannot be queried contributes nothing.
    #[instrument(skip(self, collection_ids), fields(collections = collection_ids.len()))]
    pub async fn search(&self, query: &str, collection_ids: &[String], top_k: Option<usize>) -> Vec<Chunk> {
        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Query embedding failed, falling back to sparse retrieval");
                metrics::record_retrieval_failure("dense");
                None
            }
        };
        let query = SearchQuery {
            text: query.to_string(),
            embedding,
        };

        let query = &query;
        let per_collection = join_all(collection_ids.iter().map(move |id| async move {
            match self.search_collection(query, id).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(collection = %id, error = %e, "Collection query failed, skipping");
                    metrics::record_retrieval_failure("collection");
                    Vec::new()
                }
            }
        }))
        .await;

        let ranked = RelativeScoreFusion::rank(per_collection, top_k);
        metrics::record_fusion(ranked.len());
        debug!(results = ranked.len(), "Fusion complete");
        ranked
    }

    async fn search_collection(&self, query: &SearchQuery, id: &str) -> Result<Vec<Chunk>> {
        let collection = match self.backend.get(id).await? {
            Some(collection) => collection,
            None => {
                debug!(collection = id, "Collection does not exist");
                return Ok(Vec::new());
            }
        };

        // Without a query embedding only the lexical mode can answer
        let dense = async {
            match query.embedding {
                Some(_) => collection.query(query, RetrievalMode::Dense, self.k).await,
                None => Ok(Vec::new()),
            }
        };
        let (dense, sparse) = tokio::join!(
            dense,
            collection.query(query, RetrievalMode::Sparse, self.k)
        );

        let dense = dense.map_err(|e| wrap(id, RetrievalMode::Dense, e))?;
        let sparse = sparse.map_err(|e| wrap(id, RetrievalMode::Sparse, e))?;

        Ok(self.fusion.fuse(dense, sparse, self.per_collection_top_k))
    }
}

fn wrap(collection: &str, mode: RetrievalMode, e: AppError) -> AppError {
    match e {
        AppError::RetrievalFailure { .. } => e,
        other => AppError::RetrievalFailure {
            collection: collection.to_string(),
            message: format!("{} query: {}", mode.as_str(), other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{ChunkKind, ChunkRecord, Collection, MemoryBackend};
    use async_trait::async_trait;
    use docfill_common::embeddings::HashEmbedder;

    /// Backend whose collections exist but always fail to answer
    struct BrokenBackend;

    struct BrokenCollection;

    #[async_trait]
    impl Collection for BrokenCollection {
        fn id(&self) -> &str {
            "broken"
        }
        async fn upsert(&self, _records: Vec<ChunkRecord>) -> Result<()> {
            Ok(())
        }
        async fn query(&self, _q: &SearchQuery, _m: RetrievalMode, _k: usize) -> Result<Vec<Chunk>> {
            Err(AppError::Internal {
                message: "connection refused".into(),
            })
        }
        async fn clear(&self) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _ids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn len(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[async_trait]
    impl CollectionBackend for BrokenBackend {
        async fn open(&self, _id: &str) -> Result<Arc<dyn Collection>> {
            Ok(Arc::new(BrokenCollection))
        }
        async fn get(&self, id: &str) -> Result<Option<Arc<dyn Collection>>> {
            Ok(Some(self.open(id).await?))
        }
        async fn drop_collection(&self, _id: &str) -> Result<()> {
            Ok(())
        }
        async fn list(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    /// Routes "broken" to a failing collection and everything else to memory
    struct MixedBackend {
        memory: MemoryBackend,
    }

    #[async_trait]
    impl CollectionBackend for MixedBackend {
        async fn open(&self, id: &str) -> Result<Arc<dyn Collection>> {
            self.memory.open(id).await
        }
        async fn get(&self, id: &str) -> Result<Option<Arc<dyn Collection>>> {
            if id == "broken" {
                BrokenBackend.get(id).await
            } else {
                self.memory.get(id).await
            }
        }
        async fn drop_collection(&self, id: &str) -> Result<()> {
            self.memory.drop_collection(id).await
        }
        async fn list(&self) -> Result<Vec<String>> {
            self.memory.list().await
        }
    }

    async fn seed(backend: &dyn CollectionBackend, embedder: &HashEmbedder, id: &str, texts: &[&str]) {
        let collection = backend.open(id).await.unwrap();
        let mut records = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            records.push(ChunkRecord {
                id: format!("{}-{}", id, i),
                source_id: id.to_string(),
                text: text.to_string(),
                kind: ChunkKind::Text,
                page: "1".to_string(),
                embedding: embedder.embed(text).await.unwrap(),
            });
        }
        collection.upsert(records).await.unwrap();
    }

    fn engine(backend: Arc<dyn CollectionBackend>) -> FusionEngine {
        FusionEngine::new(backend, Arc::new(HashEmbedder::new(128)), &RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_results_ranked_across_collections() {
        let embedder = HashEmbedder::new(128);
        let backend = Arc::new(MemoryBackend::new());
        seed(&*backend, &embedder, "a", &["maintenance schedule for pumps"]).await;
        seed(&*backend, &embedder, "b", &["cafeteria opening hours", "pump maintenance checklist"]).await;

        let engine = engine(backend);
        let results = engine
            .search("pump maintenance", &["a".to_string(), "b".to_string()], None)
            .await;

        assert!(!results.is_empty());
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().any(|c| c.source_id == "a"));
        assert!(results.iter().any(|c| c.source_id == "b"));
    }

    #[tokio::test]
    async fn test_failing_collection_is_isolated() {
        let embedder = HashEmbedder::new(128);
        let backend = Arc::new(MixedBackend {
            memory: MemoryBackend::new(),
        });
        seed(&*backend, &embedder, "good", &["valve inspection interval"]).await;

        let engine = engine(backend);
        let results = engine
            .search(
                "valve inspection",
                &["broken".to_string(), "good".to_string()],
                None,
            )
            .await;

        assert!(!results.is_empty());
        assert!(results.iter().all(|c| c.source_id == "good"));
    }

    #[tokio::test]
    async fn test_deleted_collection_returns_nothing() {
        let embedder = HashEmbedder::new(128);
        let backend = Arc::new(MemoryBackend::new());
        seed(&*backend, &embedder, "gone", &["retention policy"]).await;
        backend.drop_collection("gone").await.unwrap();

        let engine = engine(backend);
        let results = engine.search("retention policy", &["gone".to_string()], None).await;
        assert!(results.is_empty());
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::EmbeddingError {
                message: "connection refused".into(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::EmbeddingError {
                message: "connection refused".into(),
            })
        }

        fn model_name(&self) -> &str {
            "down"
        }

        fn dimension(&self) -> usize {
            128
        }
    }

    #[tokio::test]
    async fn test_embedder_outage_keeps_sparse_results() {
        let embedder = HashEmbedder::new(128);
        let backend = Arc::new(MemoryBackend::new());
        seed(&*backend, &embedder, "a", &["valve inspection interval", "cafeteria menu"]).await;

        let engine = FusionEngine::new(backend, Arc::new(DownEmbedder), &RetrievalConfig::default());
        let results = engine.search("valve inspection", &["a".to_string()], None).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "valve inspection interval");
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_top_k_truncates() {
        let embedder = HashEmbedder::new(128);
        let backend = Arc::new(MemoryBackend::new());
        seed(&*backend, &embedder, "a", &["alpha one", "alpha two", "alpha three"]).await;

        let engine = engine(backend);
        let results = engine.search("alpha", &["a".to_string()], Some(2)).await;
        assert_eq!(results.len(), 2);
    }
}
