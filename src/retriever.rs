//! Hybrid retrieval: weighted fusion of vector and lexical rankings.
//!
//! # Fusion algorithm
//!
//! 1. Fetch `pool = candidate_pool_factor × k` candidates from each channel
//!    (never fewer than `k`), so fusion has headroom and neither channel
//!    starves the other of ranks.
//! 2. Min-max normalize each channel's scores to `[0, 1]` independently.
//!    A constant list (all scores equal) normalizes to `0.5` — it carries
//!    no ranking signal, so it should neither dominate nor vanish.
//! 3. For the union of candidates: `fused = α·vector + (1−α)·lexical`,
//!    with a chunk missing from a channel scoring `0` there.
//! 4. Sort fused descending; ties break on the original vector rank
//!    (chunks absent from the vector list sort last among ties), then on
//!    chunk id.
//! 5. Return the top `k`.
//!
//! α = 1 reduces exactly to the vector ranking and α = 0 to the lexical
//! ranking; the tests pin both equivalences.

use anyhow::Result;
use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding;
use crate::models::RetrievedChunk;
use crate::snapshot::IndexSnapshot;

/// Run hybrid search against one snapshot and return the top `k` chunks.
///
/// An empty query, an empty index, or a query with no matching terms and a
/// zero embedding all produce an empty result, never an error.
pub async fn search(
    snapshot: &IndexSnapshot,
    retrieval: &RetrievalConfig,
    embedding_config: &crate::config::EmbeddingConfig,
    query: &str,
    k: usize,
    alpha: f64,
) -> Result<Vec<RetrievedChunk>> {
    if query.trim().is_empty() || snapshot.chunk_count() == 0 || k == 0 {
        return Ok(Vec::new());
    }

    let pool = (k * retrieval.candidate_pool_factor).max(k);

    let query_vec = embedding::embed_query(embedding_config, query).await?;
    let vector_hits = snapshot.vector.search(&query_vec, pool);
    let lexical_hits = snapshot.lexical.search(query, pool)?;

    Ok(fuse(snapshot, &vector_hits, &lexical_hits, k, alpha))
}

/// Pure fusion step, separated from embedding so it can be tested with
/// synthetic hit lists.
fn fuse(
    snapshot: &IndexSnapshot,
    vector_hits: &[crate::vector_index::VectorHit],
    lexical_hits: &[crate::lexical_index::LexicalHit],
    k: usize,
    alpha: f64,
) -> Vec<RetrievedChunk> {
    let norm_vector = normalize(vector_hits.iter().map(|h| h.similarity));
    let norm_lexical = normalize(lexical_hits.iter().map(|h| h.score));

    // At the extremes the fused ranking must be exactly the single
    // channel's ranking, including membership, so zero-imputed candidates
    // from the other channel cannot pad the tail.
    if alpha >= 1.0 {
        return hydrate(
            snapshot,
            vector_hits.iter().map(|h| h.chunk_id.as_str()).zip(norm_vector),
            k,
        );
    }
    if alpha <= 0.0 {
        return hydrate(
            snapshot,
            lexical_hits.iter().map(|h| h.chunk_id.as_str()).zip(norm_lexical),
            k,
        );
    }

    let vec_scores: HashMap<&str, f64> = vector_hits
        .iter()
        .zip(norm_vector)
        .map(|(h, s)| (h.chunk_id.as_str(), s))
        .collect();
    let vec_ranks: HashMap<&str, usize> = vector_hits
        .iter()
        .enumerate()
        .map(|(rank, h)| (h.chunk_id.as_str(), rank))
        .collect();
    let lex_scores: HashMap<&str, f64> = lexical_hits
        .iter()
        .zip(norm_lexical)
        .map(|(h, s)| (h.chunk_id.as_str(), s))
        .collect();

    let mut union: Vec<&str> = Vec::new();
    let mut seen: HashMap<&str, ()> = HashMap::new();
    for id in vector_hits
        .iter()
        .map(|h| h.chunk_id.as_str())
        .chain(lexical_hits.iter().map(|h| h.chunk_id.as_str()))
    {
        if seen.insert(id, ()).is_none() {
            union.push(id);
        }
    }

    let mut fused: Vec<(&str, f64, usize)> = union
        .into_iter()
        .map(|id| {
            let v = vec_scores.get(id).copied().unwrap_or(0.0);
            let l = lex_scores.get(id).copied().unwrap_or(0.0);
            let score = alpha * v + (1.0 - alpha) * l;
            let vec_rank = vec_ranks.get(id).copied().unwrap_or(usize::MAX);
            (id, score, vec_rank)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
            .then(a.0.cmp(b.0))
    });
    fused.truncate(k);

    hydrate(snapshot, fused.into_iter().map(|(id, score, _)| (id, score)), k)
}

fn hydrate<'a>(
    snapshot: &IndexSnapshot,
    scored: impl Iterator<Item = (&'a str, f64)>,
    k: usize,
) -> Vec<RetrievedChunk> {
    scored
        .filter_map(|(id, score)| {
            snapshot.chunk(id).map(|c| RetrievedChunk {
                chunk_id: c.id.clone(),
                document_id: c.document_id.clone(),
                text: c.text.clone(),
                score,
            })
        })
        .take(k)
        .collect()
}

/// Min-max normalize to `[0, 1]`. A constant list maps to 0.5 everywhere:
/// the channel ranked nothing, so it contributes a neutral score rather
/// than claiming every candidate is the best or the worst.
fn normalize(scores: impl Iterator<Item = f64>) -> Vec<f64> {
    let raw: Vec<f64> = scores.collect();
    if raw.is_empty() {
        return raw;
    }

    let s_min = raw.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let s_max = raw.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

    if (s_max - s_min).abs() < f64::EPSILON {
        return vec![0.5; raw.len()];
    }

    raw.iter().map(|s| (s - s_min) / (s_max - s_min)).collect()
}
