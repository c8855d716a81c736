//! Token-budgeted prompt assembly.
//!
//! The model window `T` minus the reserved response allowance `R` bounds
//! everything we send. The query is never truncated; chunks are taken
//! highest-rank-first with the last one clipped to fit; history is taken
//! newest-first, with the rolling summary standing in for turns it
//! supersedes.

use std::fmt;

use serde::Serialize;

use crate::config::ContextConfig;
use crate::models::{ConversationSummary, RetrievedChunk, Turn, TurnRole};
use crate::tokenize::{count_tokens, truncate_tokens};

/// Per-category token accounting, reported on the debug surface.
#[derive(Debug, Clone, Serialize)]
pub struct TokensEstimate {
    pub conversation: usize,
    pub retrieved: usize,
    pub query: usize,
    pub total_context_allowed: usize,
}

/// Prompt sections that fit inside the budget.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub conversation: String,
    pub retrieved: String,
    pub tokens: TokensEstimate,
}

/// The query alone does not fit in `T - R`. A request-level
/// configuration error, not something to silently truncate.
#[derive(Debug)]
pub struct BudgetExceeded {
    pub query_tokens: usize,
    pub allowed: usize,
}

impl fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "query of {} tokens exceeds the context budget of {} tokens",
            self.query_tokens, self.allowed
        )
    }
}

impl std::error::Error for BudgetExceeded {}

/// Assemble retrieved chunks and conversation history into prompt
/// sections bounded by `model_max_tokens - reserved_response_tokens`.
///
/// `turns` are oldest-first as loaded from the store. A summary, when
/// present, substitutes every turn with index below its
/// `upto_turn_index`.
pub fn assemble(
    config: &ContextConfig,
    query: &str,
    chunks: &[RetrievedChunk],
    turns: &[Turn],
    summary: Option<&ConversationSummary>,
) -> Result<AssembledContext, BudgetExceeded> {
    let allowed = config
        .model_max_tokens
        .saturating_sub(config.reserved_response_tokens);

    let query_tokens = count_tokens(query);
    if query_tokens > allowed {
        return Err(BudgetExceeded {
            query_tokens,
            allowed,
        });
    }

    let remaining = allowed - query_tokens;
    let history_reserve = config.min_history_tokens.min(remaining);
    let chunk_budget = remaining - history_reserve;

    let (retrieved, retrieved_tokens) = take_chunks(chunks, chunk_budget);

    let history_budget = remaining - retrieved_tokens;
    let (conversation, conversation_tokens) = take_history(turns, summary, history_budget);

    Ok(AssembledContext {
        conversation,
        retrieved,
        tokens: TokensEstimate {
            conversation: conversation_tokens,
            retrieved: retrieved_tokens,
            query: query_tokens,
            total_context_allowed: allowed,
        },
    })
}

/// Chunks in rank order; the last included chunk may be truncated to the
/// remaining budget.
fn take_chunks(chunks: &[RetrievedChunk], budget: usize) -> (String, usize) {
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0;
    for chunk in chunks {
        let left = budget - used;
        if left == 0 {
            break;
        }
        let tokens = count_tokens(&chunk.text);
        if tokens <= left {
            used += tokens;
            parts.push(chunk.text.clone());
        } else {
            let clipped = truncate_tokens(&chunk.text, left);
            used += count_tokens(&clipped);
            parts.push(clipped);
            break;
        }
    }
    (parts.join("\n\n"), used)
}

/// History newest-first, whole turns only, emitted back in chronological
/// order. Turns superseded by the summary are dropped; the summary
/// itself is prepended if it fits after the kept turns.
fn take_history(
    turns: &[Turn],
    summary: Option<&ConversationSummary>,
    budget: usize,
) -> (String, usize) {
    let first_live = summary.map(|s| s.upto_turn_index.max(0) as usize).unwrap_or(0);
    let live = &turns[first_live.min(turns.len())..];

    let mut kept: Vec<String> = Vec::new();
    let mut used = 0;
    for turn in live.iter().rev() {
        let line = render_turn(turn);
        let tokens = count_tokens(&line);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        kept.push(line);
    }
    kept.reverse();

    if let Some(s) = summary {
        let line = format!("Summary of earlier conversation: {}", s.summary_text);
        let tokens = count_tokens(&line);
        if used + tokens <= budget {
            used += tokens;
            kept.insert(0, line);
        }
    }

    (kept.join("\n"), used)
}

/// Assistant turns carry an optional stored compaction of their context;
/// when present it replaces the full response text in the prompt.
fn render_turn(turn: &Turn) -> String {
    let label = match turn.role {
        TurnRole::User => "User",
        TurnRole::Assistant => "Assistant",
    };
    let body = match (&turn.role, &turn.context_summary) {
        (TurnRole::Assistant, Some(s)) if !s.is_empty() => s,
        _ => &turn.text,
    };
    format!("{}: {}", label, body)
}
