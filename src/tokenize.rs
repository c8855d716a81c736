//! Shared tokenization for chunking, lexical indexing, and budgeting.
//!
//! One tokenizer is used everywhere a token count matters, so the chunker's
//! `token_count`, the BM25 index's term statistics, and the context
//! budgeter's arithmetic all agree. The lexical index records
//! [`signature`] at build time and rejects queries tokenized differently.

use sha2::{Digest, Sha256};

/// Human-readable description of the tokenization scheme. Bump this string
/// whenever [`tokenize`] changes behavior; the signature derives from it.
const TOKENIZER_DESC: &str = "lowercase-whitespace-v1;min_len=2";

/// Minimum token length. Single characters carry no retrieval signal and
/// inflate the postings list.
const MIN_TOKEN_LEN: usize = 2;

/// Lowercase whitespace tokenization with short-token filtering.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .collect()
}

/// Token count used for context budgeting. Counts whitespace words without
/// the short-token filter so budget arithmetic tracks prompt size, not
/// index vocabulary.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate `text` to at most `max_tokens` whitespace words.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 signature of the tokenizer scheme, stored in the lexical index
/// at build time and validated at query time.
pub fn signature() -> String {
    let mut hasher = Sha256::new();
    hasher.update(TOKENIZER_DESC.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_strips() {
        let tokens = tokenize("Article 21 protects Life, and Liberty.");
        assert_eq!(tokens, vec!["article", "21", "protects", "life", "and", "liberty"]);
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = tokenize("a I at it");
        assert_eq!(tokens, vec!["at", "it"]);
    }

    #[test]
    fn test_count_tokens_empty() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("   "), 0);
    }

    #[test]
    fn test_count_tokens_words() {
        assert_eq!(count_tokens("one two three"), 3);
    }

    #[test]
    fn test_truncate_tokens() {
        assert_eq!(truncate_tokens("one two three four", 2), "one two");
        assert_eq!(truncate_tokens("one", 5), "one");
    }

    #[test]
    fn test_signature_stable() {
        assert_eq!(signature(), signature());
        assert_eq!(signature().len(), 64);
    }
}
