//! BM25 lexical index over chunk text.
//!
//! Standard Okapi BM25 with k1 = 1.2 and b = 0.75: repeated query terms
//! saturate, and chunks longer than the corpus average are penalized. The
//! index records the tokenizer signature at build time; a query tokenized
//! under a different scheme is a silent correctness bug, so `search`
//! validates the signature instead of trusting the caller.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

use crate::models::Chunk;
use crate::tokenize;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// One scored hit from the lexical channel.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub score: f64,
}

struct Posting {
    /// Index into `chunk_ids` / `doc_lens`.
    chunk: usize,
    term_freq: u32,
}

pub struct LexicalIndex {
    chunk_ids: Vec<String>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    postings: HashMap<String, Vec<Posting>>,
    tokenizer_signature: String,
}

impl LexicalIndex {
    /// Build the index from chunks. The only mutator; a rebuild produces a
    /// fresh instance inside a new snapshot.
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize::tokenize(&chunk.text);
            let mut freqs: HashMap<&str, u32> = HashMap::new();
            for t in &tokens {
                *freqs.entry(t.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in freqs {
                postings.entry(term.to_string()).or_default().push(Posting {
                    chunk: i,
                    term_freq: tf,
                });
            }
            chunk_ids.push(chunk.id.clone());
            doc_lens.push(tokens.len());
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            chunk_ids,
            doc_lens,
            avg_doc_len,
            postings,
            tokenizer_signature: tokenize::signature(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    /// Rank chunks against `query_text` and return the top `k`.
    ///
    /// Empty corpora and queries with no indexable tokens yield an empty
    /// result, not an error.
    pub fn search(&self, query_text: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let current = tokenize::signature();
        if current != self.tokenizer_signature {
            bail!(
                "Tokenizer signature mismatch: index built with {}, query uses {}",
                self.tokenizer_signature,
                current
            );
        }

        if self.chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query_tokens = tokenize::tokenize(query_text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        // Score each distinct query term once; repeating a term in the
        // query adds nothing beyond its first occurrence.
        let terms: HashSet<&str> = query_tokens.iter().map(|t| t.as_str()).collect();

        let n = self.chunk_ids.len() as f64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in terms {
            let Some(plist) = self.postings.get(term) else {
                continue;
            };
            let df = plist.len() as f64;
            // BM25+1 idf variant; always positive, saturates for rare terms.
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for p in plist {
                let tf = p.term_freq as f64;
                let dl = self.doc_lens[p.chunk] as f64;
                let denom = tf + K1 * (1.0 - B + B * dl / self.avg_doc_len.max(1e-9));
                let contrib = idf * tf * (K1 + 1.0) / denom;
                *scores.entry(p.chunk).or_insert(0.0) += contrib;
            }
        }

        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .map(|(i, score)| LexicalHit {
                chunk_id: self.chunk_ids[i].clone(),
                score,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: format!("doc-{}", id),
            ordinal: 0,
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
        }
    }

    fn sample_index() -> LexicalIndex {
        LexicalIndex::build(&[
            make_chunk("c1", "article 21 protects life and personal liberty"),
            make_chunk("c2", "article 19 protects freedom of speech and expression"),
            make_chunk("c3", "the panchayat system organizes local governance"),
        ])
    }

    #[test]
    fn test_term_match_ranks_first() {
        let idx = sample_index();
        let hits = idx.search("right to life", 3).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, "c1");
    }

    #[test]
    fn test_empty_corpus() {
        let idx = LexicalIndex::build(&[]);
        assert!(idx.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn test_empty_query() {
        let idx = sample_index();
        assert!(idx.search("", 5).unwrap().is_empty());
        // All tokens filtered out (too short)
        assert!(idx.search("a I", 5).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_terms_saturate() {
        let idx = sample_index();
        let once = idx.search("liberty", 3).unwrap();
        let thrice = idx.search("liberty liberty liberty", 3).unwrap();
        assert_eq!(once[0].chunk_id, thrice[0].chunk_id);
        // Tripling a query term must not triple the score.
        assert!(thrice[0].score < once[0].score * 3.0);
        assert!((thrice[0].score - once[0].score).abs() < 1e-9);
    }

    #[test]
    fn test_length_penalty() {
        let idx = LexicalIndex::build(&[
            make_chunk("short", "bail procedure"),
            make_chunk(
                "long",
                "bail procedure in criminal matters involves many stages and many \
                 filings and many hearings before the magistrate and sessions court",
            ),
        ]);
        let hits = idx.search("bail procedure", 2).unwrap();
        assert_eq!(hits[0].chunk_id, "short");
    }

    #[test]
    fn test_k_truncation() {
        let idx = sample_index();
        let hits = idx.search("article protects", 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_scores_descending() {
        let idx = sample_index();
        let hits = idx.search("article 21 life liberty speech", 3).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
