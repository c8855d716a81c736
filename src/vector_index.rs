//! Dense vector index over chunk embeddings.
//!
//! Brute-force cosine similarity over all stored vectors, the same shape as
//! an exhaustive flat index. Corpora here are a few thousand chunks, so a
//! linear scan is cheaper than maintaining an ANN graph and keeps results
//! exact. `build` produces an immutable instance; mutation happens only by
//! constructing a new snapshot (see `snapshot.rs`).

use crate::embedding::cosine_similarity;

/// One scored hit from the vector channel.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    pub similarity: f64,
}

pub struct VectorIndex {
    chunk_ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dims: usize,
}

impl VectorIndex {
    /// Build the index from parallel chunk-id / embedding slices.
    ///
    /// Panics in debug builds if the slices disagree in length; in release
    /// the shorter length wins.
    pub fn build(chunk_ids: Vec<String>, vectors: Vec<Vec<f32>>, dims: usize) -> Self {
        debug_assert_eq!(chunk_ids.len(), vectors.len());
        let n = chunk_ids.len().min(vectors.len());
        Self {
            chunk_ids: chunk_ids.into_iter().take(n).collect(),
            vectors: vectors.into_iter().take(n).collect(),
            dims,
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Rank all chunks by cosine similarity to `query_vec`, descending,
    /// returning the top `k`. Ties break on chunk id for determinism.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<VectorHit> {
        let mut hits: Vec<VectorHit> = self
            .chunk_ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, vec)| VectorHit {
                chunk_id: id.clone(),
                similarity: cosine_similarity(query_vec, vec) as f64,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        hits
    }
}
