//! End-to-end pipeline tests with a scripted chat backend and the
//! deterministic hash embedding provider, so nothing here touches the
//! network.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use lexrag::config::{
    ChunkingConfig, Config, ContextConfig, CorpusConfig, DbConfig, EmbeddingConfig, LlmConfig,
    RetrievalConfig, ServerConfig, SummarizationConfig,
};
use lexrag::conversation::ConversationStore;
use lexrag::db;
use lexrag::generate::FALLBACK_RESPONSE;
use lexrag::llm::{ChatApi, ChatRequest, LlmError};
use lexrag::migrate;
use lexrag::models::TurnRole;
use lexrag::pipeline::{ChatError, RagPipeline};
use lexrag::snapshot::IndexHandle;

/// Returns queued replies in order; panics if the pipeline makes more
/// model calls than the test scripted.
struct ScriptedChat {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
}

impl ScriptedChat {
    fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
        })
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
    async fn complete(&self, _request: ChatRequest) -> Result<String, LlmError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected extra model call")
    }
}

fn write_corpus(dir: &Path) {
    fs::write(
        dir.join("doc_a.txt"),
        "Article 21 protects life and liberty.",
    )
    .unwrap();
    fs::write(
        dir.join("doc_b.txt"),
        "Article 19 protects free speech.",
    )
    .unwrap();
}

fn test_config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("lexrag.sqlite"),
        },
        corpus: CorpusConfig {
            data_dir: root.join("corpus"),
        },
        chunking: ChunkingConfig {
            chunk_size_tokens: 64,
            overlap_tokens: 8,
        },
        retrieval: RetrievalConfig {
            k: 1,
            ..Default::default()
        },
        context: ContextConfig::default(),
        embedding: EmbeddingConfig::default(),
        llm: LlmConfig::default(),
        summarization: SummarizationConfig {
            enabled: false,
            ..Default::default()
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn setup(chat: Arc<dyn ChatApi>) -> (TempDir, Arc<RagPipeline>) {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("corpus")).unwrap();
    write_corpus(&tmp.path().join("corpus"));

    let config = test_config(tmp.path());
    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = ConversationStore::new(pool);

    let pipeline = Arc::new(RagPipeline::new(config, IndexHandle::new(), store, chat));
    (tmp, pipeline)
}

#[tokio::test]
async fn test_chat_before_initialize_is_rejected() {
    let chat = ScriptedChat::new(vec![]);
    let (_tmp, pipeline) = setup(chat).await;
    let session = pipeline.create_session("u1", "").await.unwrap();

    let err = pipeline
        .chat(&session, "what is article 21", true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::IndexNotBuilt));
}

#[tokio::test]
async fn test_right_to_life_retrieves_doc_a() {
    let chat = ScriptedChat::new(vec![Ok("Article 21 guarantees it.".to_string())]);
    let (_tmp, pipeline) = setup(chat).await;

    let report = pipeline.rebuild_index(false).await.unwrap();
    assert!(report.rebuilt);
    assert_eq!(report.documents, 2);

    let session = pipeline.create_session("u1", "").await.unwrap();
    let resp = pipeline
        .chat(&session, "right to life", true, false)
        .await
        .unwrap();

    assert_eq!(resp.response, "Article 21 guarantees it.");
    assert_eq!(resp.debug.used_k, 1);
    assert!(resp.debug.retrieved_context_preview.contains("Article 21"));
    assert!(!resp.debug.retrieved_context_preview.contains("Article 19"));
    let t = &resp.debug.tokens_estimate;
    assert!(t.conversation + t.retrieved + t.query <= t.total_context_allowed);
}

#[tokio::test]
async fn test_generator_timeout_degrades_but_persists_turns() {
    let chat = ScriptedChat::new(vec![Err(LlmError::Timeout("deadline elapsed".to_string()))]);
    let (_tmp, pipeline) = setup(chat.clone()).await;
    pipeline.rebuild_index(false).await.unwrap();

    let session = pipeline.create_session("u1", "").await.unwrap();
    let resp = pipeline
        .chat(&session, "what is article 19 about", true, false)
        .await
        .unwrap();

    assert_eq!(resp.response, FALLBACK_RESPONSE);
    assert!(resp.debug.rag_error.as_deref().unwrap().contains("timeout"));
    assert!(resp.evaluation.is_none());

    let (turns, _) = pipeline.store().load(&session).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::User);
    assert_eq!(turns[0].text, "what is article 19 about");
    assert_eq!(turns[1].text, FALLBACK_RESPONSE);
}

#[tokio::test]
async fn test_evaluate_flag_controls_evaluation() {
    const EVAL_JSON: &str = r#"{
        "factual_accuracy": {"score": 4, "reason": "grounded"},
        "legal_reasoning": {"score": 4, "reason": "sound"},
        "citation_quality": {"score": 5, "reason": "cites Article 21"},
        "clarity": {"score": 4, "reason": "clear"},
        "completeness": {"score": 4, "reason": "covers it"},
        "overall_score": 4.2,
        "summary": "good"
    }"#;

    let chat = ScriptedChat::new(vec![
        Ok("Answer one.".to_string()),
        Ok(EVAL_JSON.to_string()),
        Ok("Answer two.".to_string()),
    ]);
    let (_tmp, pipeline) = setup(chat).await;
    pipeline.rebuild_index(false).await.unwrap();
    let session = pipeline.create_session("u1", "").await.unwrap();

    let evaluated = pipeline
        .chat(&session, "what is article 21", true, true)
        .await
        .unwrap();
    let evaluation = evaluated.evaluation.expect("evaluation requested");
    assert!(evaluation.overall_score >= 1.0 && evaluation.overall_score <= 5.0);

    // The evaluation is also attached to the stored assistant turn.
    let (turns, _) = pipeline.store().load(&session).await.unwrap();
    assert!(turns[1].evaluation_json.as_deref().unwrap().contains("overall_score"));

    let unevaluated = pipeline
        .chat(&session, "what is article 19", true, false)
        .await
        .unwrap();
    assert!(unevaluated.evaluation.is_none());
}

#[tokio::test]
async fn test_follow_up_is_rewritten_before_retrieval() {
    let chat = ScriptedChat::new(vec![
        // First turn: direct answer, no rewrite (no history yet).
        Ok("Bail is release pending trial.".to_string()),
        // Second turn: rewrite call, then the answer.
        Ok("appeals in the bail process".to_string()),
        Ok("Appeals go to the sessions court.".to_string()),
    ]);
    let (_tmp, pipeline) = setup(chat).await;
    pipeline.rebuild_index(false).await.unwrap();
    let session = pipeline.create_session("u1", "").await.unwrap();

    let first = pipeline
        .chat(&session, "how does the bail process work", true, false)
        .await
        .unwrap();
    assert!(!first.debug.query_rewritten);

    let second = pipeline
        .chat(&session, "what about appeals?", true, false)
        .await
        .unwrap();
    assert!(second.debug.query_rewritten);
    assert_eq!(second.debug.original_query.as_deref(), Some("what about appeals?"));
    assert_eq!(
        second.debug.rewritten_query.as_deref(),
        Some("appeals in the bail process")
    );

    // The original query text, not the rewrite, is what gets persisted.
    let (turns, _) = pipeline.store().load(&session).await.unwrap();
    assert_eq!(turns[2].text, "what about appeals?");
}

#[tokio::test]
async fn test_greeting_skips_retrieval_even_without_index() {
    let chat = ScriptedChat::new(vec![Ok("Hello! How can I help?".to_string())]);
    let (_tmp, pipeline) = setup(chat).await;
    // No rebuild_index: a greeting must not need a snapshot.
    let session = pipeline.create_session("u1", "").await.unwrap();

    let resp = pipeline.chat(&session, "hello", true, false).await.unwrap();
    assert_eq!(resp.response, "Hello! How can I help?");
    assert_eq!(resp.debug.note.as_deref(), Some("retrieval_skipped_greeting"));
    assert_eq!(resp.debug.used_k, 0);

    let (turns, _) = pipeline.store().load(&session).await.unwrap();
    assert_eq!(turns.len(), 2);
}

#[tokio::test]
async fn test_reset_clears_history() {
    let chat = ScriptedChat::new(vec![Ok("Answer.".to_string())]);
    let (_tmp, pipeline) = setup(chat).await;
    pipeline.rebuild_index(false).await.unwrap();
    let session = pipeline.create_session("u1", "").await.unwrap();

    pipeline
        .chat(&session, "what is article 21", true, false)
        .await
        .unwrap();
    pipeline.reset_session(&session).await.unwrap();

    let (turns, summary) = pipeline.store().load(&session).await.unwrap();
    assert!(turns.is_empty());
    assert!(summary.is_none());
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let chat = ScriptedChat::new(vec![]);
    let (_tmp, pipeline) = setup(chat).await;
    pipeline.rebuild_index(false).await.unwrap();

    let err = pipeline
        .chat("no-such-session", "what is article 21", true, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::SessionNotFound(_)));

    let err = pipeline.reset_session("no-such-session").await.unwrap_err();
    assert!(matches!(err, ChatError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_rebuild_without_force_is_a_noop() {
    let chat = ScriptedChat::new(vec![]);
    let (_tmp, pipeline) = setup(chat).await;

    let first = pipeline.rebuild_index(false).await.unwrap();
    assert!(first.rebuilt);
    let second = pipeline.rebuild_index(false).await.unwrap();
    assert!(!second.rebuilt);
    assert_eq!(second.chunks, first.chunks);
    let forced = pipeline.rebuild_index(true).await.unwrap();
    assert!(forced.rebuilt);
}
