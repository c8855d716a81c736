//! Atomic retrieval state: build-aside, swap-on-finish.
//!
//! An [`IndexSnapshot`] bundles the vector index, lexical index, and chunk
//! table that were built from one pass over the corpus. The active snapshot
//! lives behind an [`IndexHandle`]; `rebuild` constructs the new snapshot
//! fully off to the side and swaps the `Arc` in one store, so queries in
//! flight keep the snapshot they acquired and never observe a half-built
//! index.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::config::Config;
use crate::embedding;
use crate::lexical_index::LexicalIndex;
use crate::models::{Chunk, Document};
use crate::vector_index::VectorIndex;

/// Immutable retrieval state produced by one index build.
pub struct IndexSnapshot {
    pub vector: VectorIndex,
    pub lexical: LexicalIndex,
    /// chunk_id → chunk, for hydrating search hits with text.
    pub chunks: HashMap<String, Chunk>,
    pub document_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Shared handle to the active snapshot. Single writer (rebuild), many
/// readers; readers only clone the `Arc` and never block on a build.
#[derive(Clone, Default)]
pub struct IndexHandle {
    inner: Arc<RwLock<Option<Arc<IndexSnapshot>>>>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active snapshot, or `None` before the first build.
    pub fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.inner.read().expect("index lock poisoned").clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().expect("index lock poisoned").is_some()
    }

    /// Install `snapshot` as the active one.
    pub fn swap(&self, snapshot: Arc<IndexSnapshot>) {
        *self.inner.write().expect("index lock poisoned") = Some(snapshot);
    }
}

/// Chunk, embed, and index `documents` into a fresh snapshot.
///
/// The embedding step runs in batches against the configured provider.
/// Nothing here touches the active snapshot; callers pass the result to
/// [`IndexHandle::swap`] once it is complete.
pub async fn build_snapshot(config: &Config, documents: &[Document]) -> Result<IndexSnapshot> {
    let mut all_chunks: Vec<Chunk> = Vec::new();
    for doc in documents {
        all_chunks.extend(crate::chunk::chunk_document(
            &doc.id,
            &doc.raw_text,
            config.chunking.chunk_size_tokens,
            config.chunking.overlap_tokens,
        ));
    }

    info!(
        documents = documents.len(),
        chunks = all_chunks.len(),
        "building index snapshot"
    );

    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(all_chunks.len());
    for batch in all_chunks.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedded = embedding::embed_texts(&config.embedding, &texts).await?;
        vectors.extend(embedded);
    }

    let chunk_ids: Vec<String> = all_chunks.iter().map(|c| c.id.clone()).collect();
    let vector = VectorIndex::build(chunk_ids, vectors, config.embedding.dims);
    let lexical = LexicalIndex::build(&all_chunks);

    let chunks: HashMap<String, Chunk> =
        all_chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

    Ok(IndexSnapshot {
        vector,
        lexical,
        chunks,
        document_count: documents.len(),
        built_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, Config, CorpusConfig, DbConfig, ServerConfig,
    };

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                path: "/tmp/lexrag-test.sqlite".into(),
            },
            corpus: CorpusConfig {
                data_dir: "/tmp/lexrag-data".into(),
            },
            chunking: ChunkingConfig {
                chunk_size_tokens: 32,
                overlap_tokens: 4,
            },
            retrieval: Default::default(),
            context: Default::default(),
            embedding: Default::default(),
            llm: Default::default(),
            summarization: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_path: format!("{}.txt", id),
            title: id.to_string(),
            raw_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_build_and_swap() {
        let config = test_config();
        let handle = IndexHandle::new();
        assert!(!handle.is_initialized());
        assert!(handle.current().is_none());

        let snap = build_snapshot(
            &config,
            &[doc("a", "Article 21 protects life and liberty.")],
        )
        .await
        .unwrap();
        handle.swap(Arc::new(snap));

        assert!(handle.is_initialized());
        let current = handle.current().unwrap();
        assert_eq!(current.document_count, 1);
        assert_eq!(current.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_readers_keep_old_snapshot_across_swap() {
        let config = test_config();
        let handle = IndexHandle::new();

        let first = Arc::new(
            build_snapshot(&config, &[doc("a", "first corpus text here")])
                .await
                .unwrap(),
        );
        handle.swap(first.clone());

        let held = handle.current().unwrap();

        let second = Arc::new(
            build_snapshot(&config, &[doc("b", "entirely different corpus"), doc("c", "more")])
                .await
                .unwrap(),
        );
        handle.swap(second);

        // The reader's acquired snapshot is unchanged.
        assert_eq!(held.document_count, 1);
        assert_eq!(handle.current().unwrap().document_count, 2);
    }

    #[tokio::test]
    async fn test_rebuild_idempotent() {
        let config = test_config();
        let docs = vec![
            doc("a", "Article 21 protects life and personal liberty for all."),
            doc("b", "Article 19 protects freedom of speech and expression."),
        ];

        let s1 = build_snapshot(&config, &docs).await.unwrap();
        let s2 = build_snapshot(&config, &docs).await.unwrap();

        let q = crate::embedding::hash_embed("right to life", config.embedding.dims);
        let h1 = s1.vector.search(&q, 4);
        let h2 = s2.vector.search(&q, 4);
        let ids1: Vec<&str> = h1.iter().map(|h| h.chunk_id.as_str()).collect();
        let ids2: Vec<&str> = h2.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids1, ids2);

        let l1 = s1.lexical.search("right to life", 4).unwrap();
        let l2 = s2.lexical.search("right to life", 4).unwrap();
        let lids1: Vec<&str> = l1.iter().map(|h| h.chunk_id.as_str()).collect();
        let lids2: Vec<&str> = l2.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(lids1, lids2);
    }

    #[tokio::test]
    async fn test_empty_corpus_builds_empty_snapshot() {
        let config = test_config();
        let snap = build_snapshot(&config, &[]).await.unwrap();
        assert_eq!(snap.chunk_count(), 0);
        assert!(snap.vector.is_empty());
        assert!(snap.lexical.is_empty());
    }
}
