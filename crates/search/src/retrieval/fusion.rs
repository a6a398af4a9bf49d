//! Relative-score fusion for combining dense and sparse results
//!
//! Each mode's scores are divided by that mode's best score, so both land
//! in [0, 1] regardless of how the backend scales them. Chunks found by
//! both modes get the sum of their normalized scores.

use super::Chunk;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct RelativeScoreFusion {
    /// Weight applied to normalized dense scores
    pub dense_weight: f32,

    /// Weight applied to normalized sparse scores
    pub sparse_weight: f32,
}

impl Default for RelativeScoreFusion {
    fn default() -> Self {
        Self {
            dense_weight: 1.0,
            sparse_weight: 1.0,
        }
    }
}

impl RelativeScoreFusion {
    /// Divide every score by the maximum. A non-positive maximum zeroes the set.
    pub fn normalize(mut results: Vec<Chunk>) -> Vec<Chunk> {
        let max = results
            .iter()
            .map(|c| c.score)
            .fold(f32::NEG_INFINITY, f32::max);

        for chunk in &mut results {
            chunk.score = if max > 0.0 { chunk.score / max } else { 0.0 };
        }
        results
    }

    /// Fuse one collection's dense and sparse results.
    ///
    /// Output order before sorting is the dense enumeration followed by
    /// sparse-only chunks; the sort is stable so exact ties keep that order.
    pub fn fuse(&self, dense: Vec<Chunk>, sparse: Vec<Chunk>, limit: Option<usize>) -> Vec<Chunk> {
        let mut fused: Vec<Chunk> = Vec::with_capacity(dense.len() + sparse.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        let weighted = Self::normalize(dense)
            .into_iter()
            .map(|c| (c, self.dense_weight))
            .chain(Self::normalize(sparse).into_iter().map(|c| (c, self.sparse_weight)));

        for (mut chunk, weight) in weighted {
            chunk.score *= weight;
            match positions.get(&chunk.id) {
                Some(&pos) => fused[pos].score += chunk.score,
                None => {
                    positions.insert(chunk.id.clone(), fused.len());
                    fused.push(chunk);
                }
            }
        }

        sort_descending(&mut fused);
        if let Some(limit) = limit {
            fused.truncate(limit);
        }
        fused
    }

    /// Concatenate per-collection lists in order and rank them globally
    pub fn rank(per_collection: Vec<Vec<Chunk>>, top_k: Option<usize>) -> Vec<Chunk> {
        let mut all: Vec<Chunk> = per_collection.into_iter().flatten().collect();
        sort_descending(&mut all);
        if let Some(top_k) = top_k {
            all.truncate(top_k);
        }
        all
    }
}

/// Stable sort, best score first
fn sort_descending(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
}
