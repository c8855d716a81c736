//! Follow-up query rewriting.
//!
//! Most queries should pass through untouched: rewriting a standalone
//! question injects noise straight into retrieval. A layered heuristic
//! gate decides whether a query is a true follow-up before any model call
//! is made, and even then the rewrite is discarded if it balloons past
//! twice the original length.

use tracing::debug;

use crate::llm::{ChatApi, ChatMessage, ChatRequest};

/// Queries longer than this are assumed to be self-contained.
const MAX_REWRITE_WORDS: usize = 15;

/// Openers that signal a fresh informational question, not a follow-up.
const INFORMATIONAL_STARTERS: &[&str] = &[
    "explain", "what is", "what are", "what was", "what does", "who", "when", "where", "why",
    "how", "which", "define", "describe", "list", "tell me about",
];

/// Terms specific enough that the query stands on its own.
const SPECIFIC_LEGAL_TERMS: &[&str] = &[
    "article",
    "section",
    "act",
    "ipc",
    "crpc",
    "constitution",
    "amendment",
    "schedule",
    "panchayat",
    "fundamental rights",
    "directive principles",
    "udhr",
    "iccpr",
];

/// Pronouns and anaphora that mark a follow-up.
const FOLLOW_UP_PRONOUNS: &[&str] = &["that", "this", "those", "it", "them"];

/// Leading words that ask for elaboration of the previous answer.
const FOLLOW_UP_OPENERS: &[&str] = &["more", "another", "give", "show", "provide", "what about"];

/// Result of a rewrite decision, carrying both strings for the debug
/// surface.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub original: String,
    pub rewritten: String,
}

impl RewriteOutcome {
    pub fn was_rewritten(&self) -> bool {
        self.original != self.rewritten
    }

    fn unchanged(query: &str) -> Self {
        Self {
            original: query.to_string(),
            rewritten: query.to_string(),
        }
    }
}

/// Heuristic gate: should this query be rewritten at all?
pub fn is_follow_up(query: &str, conversation_context: &str) -> bool {
    if conversation_context.is_empty() {
        return false;
    }

    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return false;
    }

    if q.split_whitespace().count() > MAX_REWRITE_WORDS {
        return false;
    }

    if INFORMATIONAL_STARTERS.iter().any(|s| q.starts_with(s)) {
        return false;
    }

    if SPECIFIC_LEGAL_TERMS.iter().any(|t| q.contains(t)) {
        return false;
    }

    let words: Vec<&str> = q.split_whitespace().collect();
    let has_pronoun = words
        .iter()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| FOLLOW_UP_PRONOUNS.contains(&w));
    let has_opener = FOLLOW_UP_OPENERS.iter().any(|o| q.starts_with(o));

    has_pronoun || has_opener
}

/// Rewrite `query` into a self-contained question using recent
/// conversation context. Falls back to the original query on any model
/// failure or on a rewrite that more than doubles the word count.
pub async fn rewrite_query(
    chat: &dyn ChatApi,
    query: &str,
    conversation_context: &str,
) -> RewriteOutcome {
    if !is_follow_up(query, conversation_context) {
        debug!(query, "rewrite skipped: not a follow-up");
        return RewriteOutcome::unchanged(query);
    }

    // Only the tail of the conversation matters for resolving references.
    let context_tail: String = {
        let chars: Vec<char> = conversation_context.chars().collect();
        let start = chars.len().saturating_sub(800);
        chars[start..].iter().collect()
    };

    let prompt = format!(
        "You are rewriting a follow-up legal question to be self-contained.\n\n\
         Previous conversation (most recent turns):\n{}\n\n\
         User's follow-up: {}\n\n\
         Rules:\n\
         1. If the query references \"that\", \"this\", \"it\", replace with the actual topic from conversation\n\
         2. Preserve exact legal terminology (Article numbers, act names, constitutional terms)\n\
         3. Keep it concise (max 20 words)\n\
         4. If already clear, return unchanged\n\n\
         Rewritten question:",
        context_tail, query
    );

    let request = ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        temperature: 0.05,
        max_tokens: 50,
    };

    match chat.complete(request).await {
        Ok(raw) => {
            let rewritten = raw.trim().trim_matches('"').to_string();
            if rewritten.is_empty()
                || rewritten.split_whitespace().count() > query.split_whitespace().count() * 2
            {
                debug!(query, rewritten, "rewrite discarded: too verbose or empty");
                return RewriteOutcome::unchanged(query);
            }
            debug!(original = query, rewritten = %rewritten, "query rewritten");
            RewriteOutcome {
                original: query.to_string(),
                rewritten,
            }
        }
        Err(e) => {
            debug!(query, error = %e, "rewrite failed; using original");
            RewriteOutcome::unchanged(query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedChat(String);

    #[async_trait]
    impl ChatApi for FixedChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String, crate::llm::LlmError> {
            Ok(self.0.clone())
        }
    }

    struct FailingChat;

    #[async_trait]
    impl ChatApi for FailingChat {
        async fn complete(&self, _request: ChatRequest) -> Result<String, crate::llm::LlmError> {
            Err(crate::llm::LlmError::Timeout("forced".into()))
        }
    }

    const CONTEXT: &str = "User: what is the bail process\nAssistant: Bail is ...";

    #[test]
    fn test_no_history_never_follow_up() {
        assert!(!is_follow_up("what about appeals?", ""));
    }

    #[test]
    fn test_informational_starter_not_follow_up() {
        assert!(!is_follow_up("what is habeas corpus", CONTEXT));
        assert!(!is_follow_up("explain the writ jurisdiction", CONTEXT));
    }

    #[test]
    fn test_specific_legal_term_not_follow_up() {
        assert!(!is_follow_up("does article 21 cover privacy, or that too?", CONTEXT));
    }

    #[test]
    fn test_long_query_not_follow_up() {
        let long = "please provide a very detailed and thorough account of every procedural \
                    stage involved in criminal appellate review";
        assert!(!is_follow_up(long, CONTEXT));
    }

    #[test]
    fn test_pronoun_marks_follow_up() {
        assert!(is_follow_up("can you elaborate on that", CONTEXT));
        assert!(is_follow_up("list them", CONTEXT));
    }

    #[test]
    fn test_opener_marks_follow_up() {
        assert!(is_follow_up("what about appeals?", CONTEXT));
        assert!(is_follow_up("give examples", CONTEXT));
    }

    #[tokio::test]
    async fn test_rewrite_uses_model_output() {
        let chat = FixedChat("appeals in the bail process".to_string());
        let out = rewrite_query(&chat, "what about appeals?", CONTEXT).await;
        assert!(out.was_rewritten());
        assert_eq!(out.rewritten, "appeals in the bail process");
        assert_eq!(out.original, "what about appeals?");
    }

    #[tokio::test]
    async fn test_rewrite_discards_verbose_output() {
        let verbose = "a very long rewritten query that keeps going and going well past \
                       twice the original length of the question";
        let chat = FixedChat(verbose.to_string());
        let out = rewrite_query(&chat, "what about appeals?", CONTEXT).await;
        assert!(!out.was_rewritten());
    }

    #[tokio::test]
    async fn test_rewrite_failure_falls_back() {
        let out = rewrite_query(&FailingChat, "what about appeals?", CONTEXT).await;
        assert!(!out.was_rewritten());
        assert_eq!(out.rewritten, "what about appeals?");
    }

    #[tokio::test]
    async fn test_non_follow_up_skips_model() {
        // FixedChat would rewrite if called; gate must short-circuit first.
        let chat = FixedChat("should not appear".to_string());
        let out = rewrite_query(&chat, "what is the panchayat system", CONTEXT).await;
        assert!(!out.was_rewritten());
    }
}
