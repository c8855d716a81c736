//! Core data models used throughout lexrag.
//!
//! These types represent the documents, chunks, conversation turns, and
//! evaluation results that flow through the retrieval and generation
//! pipeline.

use serde::{Deserialize, Serialize};

/// A source document loaded from the corpus directory.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_path: String,
    pub title: String,
    pub raw_text: String,
}

/// A bounded span of document text, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id derived from document id, ordinal, and chunking
    /// parameters, so ids are stable across rebuilds with the same config.
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub token_count: usize,
}

/// A ranked chunk returned by retrieval, with its fused score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub score: f64,
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<TurnRole> {
        match s {
            "user" => Some(TurnRole::User),
            "assistant" => Some(TurnRole::Assistant),
            _ => None,
        }
    }
}

/// One message in a session's ordered history.
#[derive(Debug, Clone)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub role: TurnRole,
    pub text: String,
    /// Compact form of an assistant answer used when rebuilding
    /// conversation context for later turns. `None` for user turns.
    pub context_summary: Option<String>,
    pub created_at: i64,
    pub debug_json: Option<String>,
    pub evaluation_json: Option<String>,
}

/// Rolling summary of the turns older than `upto_turn_index`.
///
/// A new summary supersedes the previous one for the session; there is at
/// most one row per session.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub session_id: String,
    pub upto_turn_index: i64,
    pub summary_text: String,
}

/// Score and justification for one rubric dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f64,
    pub reason: String,
}

/// Rubric-based evaluation of one assistant turn. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub factual_accuracy: DimensionScore,
    pub legal_reasoning: DimensionScore,
    pub citation_quality: DimensionScore,
    pub clarity: DimensionScore,
    pub completeness: DimensionScore,
    pub overall_score: f64,
    pub summary: String,
}

impl EvaluationResult {
    pub fn dimensions(&self) -> [&DimensionScore; 5] {
        [
            &self.factual_accuracy,
            &self.legal_reasoning,
            &self.citation_quality,
            &self.clarity,
            &self.completeness,
        ]
    }
}
