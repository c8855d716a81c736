//! Request orchestration: load history, rewrite, retrieve, budget,
//! generate, persist, evaluate.
//!
//! Retrieval and generation failures degrade the response (fallback text
//! plus a debug-visible cause) instead of failing the request; the user's
//! turn is always persisted before the assistant turn is attempted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};

use crate::budget::{self, BudgetExceeded, TokensEstimate};
use crate::config::Config;
use crate::conversation::{ConversationStore, NewTurn};
use crate::corpus;
use crate::generate::{self, FALLBACK_RESPONSE};
use crate::judge;
use crate::llm::ChatApi;
use crate::models::{ConversationSummary, EvaluationResult, RetrievedChunk, Turn, TurnRole};
use crate::retriever;
use crate::rewrite;
use crate::snapshot::{build_snapshot, IndexHandle};
use crate::tokenize::{count_tokens, truncate_tokens};

const PREVIEW_CHARS: usize = 200;

/// Answers longer than this get a stored compaction used when replaying
/// history into later prompts.
const COMPACTION_TOKENS: usize = 120;

/// Request-fatal failures. Everything else degrades into a successful
/// response with `debug.rag_error` set.
#[derive(Debug)]
pub enum ChatError {
    SessionNotFound(String),
    IndexNotBuilt,
    BudgetExceeded(BudgetExceeded),
    Internal(anyhow::Error),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::SessionNotFound(id) => write!(f, "session not found: {}", id),
            ChatError::IndexNotBuilt => {
                write!(f, "index not built; call /initialize before chatting")
            }
            ChatError::BudgetExceeded(e) => write!(f, "{}", e),
            ChatError::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        ChatError::Internal(e)
    }
}

/// Observability payload attached to every chat response.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub tokens_estimate: TokensEstimate,
    pub query_rewritten: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    pub conversation_context_preview: String,
    pub retrieved_context_preview: String,
    pub used_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub debug: DebugInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub rebuilt: bool,
    pub documents: usize,
    pub chunks: usize,
}

pub struct RagPipeline {
    config: Config,
    index: IndexHandle,
    store: ConversationStore,
    chat: Arc<dyn ChatApi>,
    /// One in-flight request per session; distinct sessions run in
    /// parallel.
    session_guards: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
    build_guard: TokioMutex<()>,
}

impl RagPipeline {
    pub fn new(
        config: Config,
        index: IndexHandle,
        store: ConversationStore,
        chat: Arc<dyn ChatApi>,
    ) -> Self {
        Self {
            config,
            index,
            store,
            chat,
            session_guards: StdMutex::new(HashMap::new()),
            build_guard: TokioMutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn is_initialized(&self) -> bool {
        self.index.is_initialized()
    }

    /// Build a fresh snapshot from the corpus directory and swap it in.
    /// A no-op when an index already exists and `force` is false.
    pub async fn rebuild_index(&self, force: bool) -> Result<RebuildReport> {
        let _build = self.build_guard.lock().await;

        if self.index.is_initialized() && !force {
            let snapshot = self.index.current();
            let (documents, chunks) = snapshot
                .map(|s| (s.document_count, s.chunk_count()))
                .unwrap_or((0, 0));
            return Ok(RebuildReport {
                rebuilt: false,
                documents,
                chunks,
            });
        }

        let documents = corpus::load_documents(&self.config.corpus.data_dir)?;
        let snapshot = build_snapshot(&self.config, &documents).await?;
        let report = RebuildReport {
            rebuilt: true,
            documents: snapshot.document_count,
            chunks: snapshot.chunk_count(),
        };
        self.index.swap(Arc::new(snapshot));
        info!(
            documents = report.documents,
            chunks = report.chunks,
            "index snapshot swapped in"
        );
        Ok(report)
    }

    pub async fn create_session(&self, user_id: &str, title: &str) -> Result<String> {
        self.store.create_session(user_id, title).await
    }

    pub async fn reset_session(&self, session_id: &str) -> Result<(), ChatError> {
        if !self.store.session_exists(session_id).await? {
            return Err(ChatError::SessionNotFound(session_id.to_string()));
        }
        let guard = self.session_guard(session_id);
        let _lock = guard.lock().await;
        self.store.reset(session_id).await?;
        Ok(())
    }

    pub async fn chat(
        &self,
        session_id: &str,
        query: &str,
        include_history: bool,
        evaluate: bool,
    ) -> Result<ChatResponse, ChatError> {
        // Existence first, so unknown ids never allocate a guard entry.
        if !self.store.session_exists(session_id).await? {
            return Err(ChatError::SessionNotFound(session_id.to_string()));
        }

        let guard = self.session_guard(session_id);
        let _lock = guard.lock().await;

        if is_greeting(query) && !is_informational(query) {
            return self.answer_greeting(session_id, query, evaluate).await;
        }

        let snapshot = self.index.current().ok_or(ChatError::IndexNotBuilt)?;

        // LOAD_HISTORY
        let (turns, summary) = if include_history {
            self.store.load(session_id).await?
        } else {
            (Vec::new(), None)
        };
        let conversation_context = render_context(&turns, summary.as_ref());

        // REWRITE_QUERY
        let rewritten =
            rewrite::rewrite_query(self.chat.as_ref(), query, &conversation_context).await;

        // RETRIEVE
        let (chunks, retrieve_error) = match retriever::search(
            &snapshot,
            &self.config.retrieval,
            &self.config.embedding,
            &rewritten.rewritten,
            self.config.retrieval.k,
            self.config.retrieval.hybrid_alpha,
        )
        .await
        {
            Ok(hits) => (self.filter_by_score(hits), None),
            Err(e) => {
                warn!(session_id, error = %e, "retrieval failed; degrading response");
                (Vec::new(), Some(format!("retrieval failed: {}", e)))
            }
        };

        // BUDGET_CONTEXT
        let assembled = budget::assemble(
            &self.config.context,
            &rewritten.rewritten,
            &chunks,
            &turns,
            summary.as_ref(),
        )
        .map_err(ChatError::BudgetExceeded)?;

        // GENERATE (skipped when retrieval already failed)
        let (answer_text, rag_error) = if let Some(cause) = retrieve_error {
            (FALLBACK_RESPONSE.to_string(), Some(cause))
        } else {
            let generated = generate::generate(
                self.chat.as_ref(),
                &rewritten.rewritten,
                &assembled.retrieved,
                &assembled.conversation,
            )
            .await;
            (generated.text, generated.error)
        };

        let debug = DebugInfo {
            tokens_estimate: assembled.tokens.clone(),
            query_rewritten: rewritten.was_rewritten(),
            original_query: rewritten.was_rewritten().then(|| rewritten.original.clone()),
            rewritten_query: rewritten.was_rewritten().then(|| rewritten.rewritten.clone()),
            conversation_context_preview: preview(&assembled.conversation),
            retrieved_context_preview: preview(&assembled.retrieved),
            used_k: chunks.len(),
            note: None,
            rag_error,
        };

        // PERSIST_TURN: user first, so a failed assistant write can never
        // lose the user's message.
        self.store.append(session_id, NewTurn::user(query)).await?;
        let assistant_turn_id = self
            .store
            .append(session_id, assistant_turn(&answer_text, &debug))
            .await?;

        // EVALUATE
        let evaluation = if evaluate && debug.rag_error.is_none() {
            let result = judge::evaluate(
                self.chat.as_ref(),
                &rewritten.rewritten,
                &answer_text,
                &assembled.retrieved,
            )
            .await;
            if let Some(ref result) = result {
                if let Ok(json) = serde_json::to_string(result) {
                    self.store.attach_evaluation(&assistant_turn_id, &json).await?;
                }
            }
            result
        } else {
            None
        };

        self.maybe_spawn_summarization(session_id).await;

        Ok(ChatResponse {
            response: answer_text,
            debug,
            evaluation,
        })
    }

    /// Pure greetings skip retrieval entirely and answer directly.
    async fn answer_greeting(
        &self,
        session_id: &str,
        query: &str,
        evaluate: bool,
    ) -> Result<ChatResponse, ChatError> {
        let generated = generate::generate(self.chat.as_ref(), query, "", "").await;
        let allowed = self
            .config
            .context
            .model_max_tokens
            .saturating_sub(self.config.context.reserved_response_tokens);

        let debug = DebugInfo {
            tokens_estimate: TokensEstimate {
                conversation: 0,
                retrieved: 0,
                query: count_tokens(query),
                total_context_allowed: allowed,
            },
            query_rewritten: false,
            original_query: None,
            rewritten_query: None,
            conversation_context_preview: String::new(),
            retrieved_context_preview: String::new(),
            used_k: 0,
            note: Some("retrieval_skipped_greeting".to_string()),
            rag_error: generated.error.clone(),
        };

        self.store.append(session_id, NewTurn::user(query)).await?;
        let assistant_turn_id = self
            .store
            .append(session_id, assistant_turn(&generated.text, &debug))
            .await?;

        let evaluation = if evaluate && generated.error.is_none() {
            let result = judge::evaluate(self.chat.as_ref(), query, &generated.text, "").await;
            if let Some(ref result) = result {
                if let Ok(json) = serde_json::to_string(result) {
                    self.store.attach_evaluation(&assistant_turn_id, &json).await?;
                }
            }
            result
        } else {
            None
        };

        Ok(ChatResponse {
            response: generated.text,
            debug,
            evaluation,
        })
    }

    /// Fused scores below `min_score` are dropped, unless that would
    /// leave nothing while candidates exist.
    fn filter_by_score(&self, hits: Vec<RetrievedChunk>) -> Vec<RetrievedChunk> {
        let min_score = self.config.retrieval.min_score;
        let kept: Vec<RetrievedChunk> = hits
            .iter()
            .filter(|h| h.score > min_score)
            .cloned()
            .collect();
        if kept.is_empty() {
            hits
        } else {
            kept
        }
    }

    async fn maybe_spawn_summarization(&self, session_id: &str) {
        let needs = match self
            .store
            .needs_summary(session_id, &self.config.summarization)
            .await
        {
            Ok(needs) => needs,
            Err(e) => {
                warn!(session_id, error = %e, "summary threshold check failed");
                return;
            }
        };
        if !needs {
            return;
        }

        let store = self.store.clone();
        let chat = Arc::clone(&self.chat);
        let config = self.config.summarization.clone();
        let session = session_id.to_string();
        tokio::spawn(async move {
            store.summarize_session(chat.as_ref(), &session, &config).await;
        });
    }

    fn session_guard(&self, session_id: &str) -> Arc<TokioMutex<()>> {
        let mut guards = self.session_guards.lock().expect("session guard map poisoned");
        // Guards nobody holds (strong count 1, the map's own Arc) are
        // stale; pruning here bounds the map by in-flight requests.
        guards.retain(|_, g| Arc::strong_count(g) > 1);
        Arc::clone(
            guards
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(()))),
        )
    }
}

fn assistant_turn(text: &str, debug: &DebugInfo) -> NewTurn {
    let mut turn = NewTurn::assistant(text);
    if count_tokens(text) > COMPACTION_TOKENS {
        turn.context_summary = Some(truncate_tokens(text, COMPACTION_TOKENS));
    }
    turn.debug_json = serde_json::to_string(debug).ok();
    turn
}

/// Flat rendering of the live history plus summary, used for the rewrite
/// gate and its model prompt.
fn render_context(turns: &[Turn], summary: Option<&ConversationSummary>) -> String {
    let first_live = summary.map(|s| s.upto_turn_index.max(0) as usize).unwrap_or(0);
    let mut lines: Vec<String> = Vec::new();
    if let Some(s) = summary {
        lines.push(format!("Summary of earlier conversation: {}", s.summary_text));
    }
    for turn in &turns[first_live.min(turns.len())..] {
        let label = match turn.role {
            TurnRole::User => "User",
            TurnRole::Assistant => "Assistant",
        };
        lines.push(format!("{}: {}", label, turn.text));
    }
    lines.join("\n")
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        text.chars().take(PREVIEW_CHARS).collect()
    }
}

/// Short standalone pleasantries that need no retrieval.
fn is_greeting(query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return false;
    }
    let words: Vec<&str> = q.split_whitespace().collect();
    if words.len() == 1 {
        return matches!(q.as_str(), "hi" | "hey" | "hello" | "yo" | "thanks" | "thx" | "bye");
    }
    if words.len() <= 2 {
        return matches!(
            q.as_str(),
            "good morning" | "good night" | "good evening" | "thank you" | "thanks a lot"
        );
    }
    false
}

/// Anything question-like, long, or containing legal vocabulary gets the
/// full retrieval flow even if it also looks like a pleasantry.
fn is_informational(query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return false;
    }
    if q.contains('?') || q.len() > 40 {
        return true;
    }
    const LEGAL_KEYWORDS: &[&str] = &[
        "article", "section", "act", "law", "rights", "ipc", "judgment", "judgement", "court",
        "statute", "contract", "evidence", "penalty", "fine", "offence", "crime", "liable",
        "liability", "divorce", "marriage", "custody", "writ", "injunction",
    ];
    LEGAL_KEYWORDS.iter().any(|kw| q.contains(kw))
}
