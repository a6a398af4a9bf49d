//! In-process collections
//!
//! Dense mode ranks by cosine similarity; sparse mode by BM25 over
//! lowercase alphanumeric tokens.

use super::{Chunk, ChunkRecord, Collection, CollectionBackend, RetrievalMode, SearchQuery};
use async_trait::async_trait;
use docfill_common::errors::{AppError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// BM25 term-frequency saturation
const BM25_K1: f32 = 1.2;
/// BM25 length normalization
const BM25_B: f32 = 0.75;

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// BM25 score of every record against the query terms
fn bm25_scores(records: &[ChunkRecord], query: &str) -> Vec<f32> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || records.is_empty() {
        return vec![0.0; records.len()];
    }

    let docs: Vec<Vec<String>> = records.iter().map(|r| tokenize(&r.text)).collect();
    let n = docs.len() as f32;
    let avg_len = docs.iter().map(Vec::len).sum::<usize>() as f32 / n;

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            if terms.contains(term) {
                *doc_freq.entry(term).or_default() += 1;
            }
        }
    }

    docs.iter()
        .map(|doc| {
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for token in doc {
                if terms.contains(token) {
                    *tf.entry(token.as_str()).or_default() += 1;
                }
            }

            let len_norm = if avg_len > 0.0 {
                doc.len() as f32 / avg_len
            } else {
                0.0
            };

            tf.iter()
                .map(|(term, &freq)| {
                    let df = doc_freq.get(term).copied().unwrap_or(0) as f32;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let freq = freq as f32;
                    idf * (freq * (BM25_K1 + 1.0))
                        / (freq + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm))
                })
                .sum()
        })
        .collect()
}

/// Best `k` of `(index, score)` pairs, stable on ties
fn top_k(mut scored: Vec<(usize, f32)>, k: usize) -> Vec<(usize, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

pub struct MemoryCollection {
    id: String,
    records: RwLock<Vec<ChunkRecord>>,
}

impl MemoryCollection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upsert(&self, new_records: Vec<ChunkRecord>) -> Result<()> {
        let mut records = self.records.write().await;
        for record in new_records {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
        }
        Ok(())
    }

    async fn query(&self, query: &SearchQuery, mode: RetrievalMode, k: usize) -> Result<Vec<Chunk>> {
        let records = self.records.read().await;

        let scored: Vec<(usize, f32)> = match mode {
            RetrievalMode::Dense => {
                let embedding = query.embedding.as_ref().ok_or_else(|| AppError::RetrievalFailure {
                    collection: self.id.clone(),
                    message: "dense query without embedding".to_string(),
                })?;
                records
                    .iter()
                    .enumerate()
                    .map(|(i, r)| (i, cosine(embedding, &r.embedding)))
                    .collect()
            }
            RetrievalMode::Sparse => bm25_scores(&records, &query.text)
                .into_iter()
                .enumerate()
                .filter(|(_, s)| *s > 0.0)
                .collect(),
        };

        Ok(top_k(scored, k)
            .into_iter()
            .map(|(i, score)| records[i].to_chunk(score))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        self.records.write().await.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

/// Process-local collection registry
#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CollectionBackend for MemoryBackend {
    async fn open(&self, id: &str) -> Result<Arc<dyn Collection>> {
        let mut collections = self.collections.write().await;
        let collection: Arc<dyn Collection> = collections
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(id)))
            .clone();
        Ok(collection)
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<dyn Collection>>> {
        Ok(self
            .collections
            .read()
            .await
            .get(id)
            .map(|c| c.clone() as Arc<dyn Collection>))
    }

    async fn drop_collection(&self, id: &str) -> Result<()> {
        let removed = self.collections.write().await.remove(id);
        // Handles already given out must also see an empty collection
        if let Some(collection) = removed {
            collection.clear().await?;
            debug!(collection = id, "Collection dropped");
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.collections.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::ChunkKind;

    fn record(id: &str, text: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            source_id: "src".to_string(),
            text: text.to_string(),
            kind: ChunkKind::Text,
            page: "1".to_string(),
            embedding,
        }
    }

    fn query(text: &str, embedding: Vec<f32>) -> SearchQuery {
        SearchQuery {
            text: text.to_string(),
            embedding: Some(embedding),
        }
    }

    #[tokio::test]
    async fn test_dense_ranks_by_cosine() {
        let collection = MemoryCollection::new("c");
        collection
            .upsert(vec![
                record("far", "x", vec![0.0, 1.0]),
                record("near", "y", vec![1.0, 0.1]),
            ])
            .await
            .unwrap();

        let hits = collection
            .query(&query("", vec![1.0, 0.0]), RetrievalMode::Dense, 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn test_sparse_only_returns_matches() {
        let collection = MemoryCollection::new("c");
        collection
            .upsert(vec![
                record("1", "The pump pressure limit is 40 bar", vec![]),
                record("2", "Operators sign the logbook daily", vec![]),
                record("3", "Pressure relief valves on every pump", vec![]),
            ])
            .await
            .unwrap();

        let hits = collection
            .query(&query("pump pressure", vec![]), RetrievalMode::Sparse, 10)
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(!ids.contains(&"2"));
        assert!(hits.iter().all(|c| c.score > 0.0));
    }

    #[tokio::test]
    async fn test_dense_without_embedding_fails() {
        let collection = MemoryCollection::new("c");
        let err = collection
            .query(&SearchQuery::default(), RetrievalMode::Dense, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetrievalFailure { .. }));
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_removes() {
        let collection = MemoryCollection::new("c");
        collection.upsert(vec![record("1", "old", vec![1.0])]).await.unwrap();
        collection.upsert(vec![record("1", "new", vec![1.0])]).await.unwrap();
        assert_eq!(collection.len().await.unwrap(), 1);

        collection.delete(&["1".to_string()]).await.unwrap();
        assert_eq!(collection.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_collection_yields_nothing() {
        let backend = MemoryBackend::new();
        let handle = backend.open("src-1").await.unwrap();
        handle
            .upsert(vec![record("1", "pump pressure", vec![1.0, 0.0])])
            .await
            .unwrap();

        backend.drop_collection("src-1").await.unwrap();

        assert!(backend.get("src-1").await.unwrap().is_none());
        let stale = handle
            .query(&query("pump", vec![1.0, 0.0]), RetrievalMode::Dense, 3)
            .await
            .unwrap();
        assert!(stale.is_empty());
    }

    #[test]
    fn test_bm25_prefers_rarer_terms() {
        let records = vec![
            record("1", "alpha beta", vec![]),
            record("2", "alpha gamma", vec![]),
            record("3", "alpha", vec![]),
        ];
        let scores = bm25_scores(&records, "gamma alpha");
        assert!(scores[1] > scores[0]);
        assert!(scores[1] > scores[2]);
    }
}
