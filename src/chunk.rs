//! Sliding-window token chunker.
//!
//! Splits document text into overlapping chunks measured in tokens, not
//! characters, so the context budgeter's arithmetic is exact. Each chunk
//! id is a SHA-256 of the document id, ordinal, and chunking parameters,
//! which keeps ids stable across rebuilds as long as the parameters are
//! unchanged.

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::models::Chunk;

/// Split `text` into chunks of `chunk_size` tokens stepping by
/// `chunk_size - overlap`. An overlap >= chunk_size would stall the
/// window, so it is clipped to `chunk_size - 1`.
///
/// Empty or whitespace-only documents yield zero chunks.
pub fn chunk_document(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if chunk_size == 0 {
        warn!("chunk_size_tokens is zero; producing no chunks");
        return Vec::new();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let overlap = if overlap >= chunk_size {
        warn!(
            chunk_size,
            overlap, "overlap_tokens >= chunk_size_tokens; clipping"
        );
        chunk_size - 1
    } else {
        overlap
    };
    let step = chunk_size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0usize;

    while start < words.len() {
        let end = (start + chunk_size).min(words.len());
        let span = &words[start..end];
        chunks.push(make_chunk(
            document_id,
            ordinal,
            &span.join(" "),
            span.len(),
            chunk_size,
            overlap,
        ));
        ordinal += 1;
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn make_chunk(
    document_id: &str,
    ordinal: usize,
    text: &str,
    token_count: usize,
    chunk_size: usize,
    overlap: usize,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(ordinal.to_le_bytes());
    hasher.update(chunk_size.to_le_bytes());
    hasher.update(overlap.to_le_bytes());
    let id = format!("{:x}", hasher.finalize());

    Chunk {
        id,
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        token_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        assert!(chunk_document("doc1", "", 32, 8).is_empty());
        assert!(chunk_document("doc1", "   \n\t ", 32, 8).is_empty());
    }

    #[test]
    fn test_zero_chunk_size_yields_no_chunks() {
        assert!(chunk_document("doc1", &words(10), 0, 0).is_empty());
        assert!(chunk_document("doc1", &words(10), 0, 8).is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_document("doc1", "right to life and liberty", 32, 8);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].token_count, 5);
    }

    #[test]
    fn test_overlap_clipped_when_too_large() {
        // overlap == chunk_size would never advance; must still terminate
        let chunks = chunk_document("doc1", &words(10), 4, 4);
        assert!(!chunks.is_empty());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i);
        }
    }

    #[test]
    fn test_coverage_reconstructs_document() {
        // Dropping the first `overlap` tokens of every chunk after the
        // first must reproduce the original word sequence.
        let text = words(103);
        let (chunk_size, overlap) = (16, 4);
        let chunks = chunk_document("doc1", &text, chunk_size, overlap);

        let mut rebuilt: Vec<String> = Vec::new();
        for (i, c) in chunks.iter().enumerate() {
            let toks: Vec<&str> = c.text.split_whitespace().collect();
            let skip = if i == 0 { 0 } else { overlap };
            rebuilt.extend(toks[skip..].iter().map(|s| s.to_string()));
        }
        assert_eq!(rebuilt.join(" "), text);
    }

    #[test]
    fn test_overlap_bounded() {
        let chunks = chunk_document("doc1", &words(50), 10, 3);
        for pair in chunks.windows(2) {
            let a: Vec<&str> = pair[0].text.split_whitespace().collect();
            let b: Vec<&str> = pair[1].text.split_whitespace().collect();
            // The last 3 tokens of each chunk reappear at the head of the next.
            assert_eq!(&a[a.len() - 3..], &b[..3]);
        }
    }

    #[test]
    fn test_ids_stable_across_rebuilds() {
        let text = words(40);
        let a = chunk_document("doc1", &text, 10, 2);
        let b = chunk_document("doc1", &text, 10, 2);
        let ids_a: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_ids_change_with_parameters() {
        let text = words(40);
        let a = chunk_document("doc1", &text, 10, 2);
        let b = chunk_document("doc1", &text, 12, 2);
        assert_ne!(a[0].id, b[0].id);
    }
}
