//! Session and turn persistence.
//!
//! Turns are append-only per session; `reset` clears them but keeps the
//! session row. Rolling summaries live one-per-session and are wholly
//! replaced when regenerated.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SummarizationConfig;
use crate::llm::{ChatApi, ChatMessage, ChatRequest};
use crate::models::{ConversationSummary, Turn, TurnRole};
use crate::tokenize::truncate_tokens;

/// A turn ready to be appended; ids and indexes are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: TurnRole,
    pub text: String,
    pub context_summary: Option<String>,
    pub debug_json: Option<String>,
    pub evaluation_json: Option<String>,
}

impl NewTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            context_summary: None,
            debug_json: None,
            evaluation_json: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            context_summary: None,
            debug_json: None,
            evaluation_json: None,
        }
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_session(&self, user_id: &str, title: &str) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (id, user_id, title, created_at) VALUES (?, ?, ?, ?)")
            .bind(&session_id)
            .bind(user_id)
            .bind(title)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(session_id)
    }

    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Ordered turns for a session plus the latest rolling summary.
    pub async fn load(&self, session_id: &str) -> Result<(Vec<Turn>, Option<ConversationSummary>)> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, text, context_summary, created_at, debug_json, evaluation_json
             FROM turns WHERE session_id = ? ORDER BY turn_index ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let role_str: String = row.get("role");
            let Some(role) = TurnRole::parse(&role_str) else {
                bail!("unknown turn role in store: '{}'", role_str);
            };
            turns.push(Turn {
                id: row.get("id"),
                session_id: row.get("session_id"),
                role,
                text: row.get("text"),
                context_summary: row.get("context_summary"),
                created_at: row.get("created_at"),
                debug_json: row.get("debug_json"),
                evaluation_json: row.get("evaluation_json"),
            });
        }

        let summary = sqlx::query(
            "SELECT upto_turn_index, summary_text FROM summaries WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| ConversationSummary {
            session_id: session_id.to_string(),
            upto_turn_index: row.get("upto_turn_index"),
            summary_text: row.get("summary_text"),
        });

        Ok((turns, summary))
    }

    /// Append one turn, assigning the next index in the session. Callers
    /// serialize per session, so max+1 cannot race within a session.
    pub async fn append(&self, session_id: &str, turn: NewTurn) -> Result<String> {
        let turn_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO turns (id, session_id, turn_index, role, text, context_summary, created_at, debug_json, evaluation_json)
            SELECT ?, ?, COALESCE(MAX(turn_index) + 1, 0), ?, ?, ?, ?, ?, ?
            FROM turns WHERE session_id = ?
            "#,
        )
        .bind(&turn_id)
        .bind(session_id)
        .bind(turn.role.as_str())
        .bind(&turn.text)
        .bind(&turn.context_summary)
        .bind(Utc::now().timestamp())
        .bind(&turn.debug_json)
        .bind(&turn.evaluation_json)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(turn_id)
    }

    pub async fn attach_evaluation(&self, turn_id: &str, evaluation_json: &str) -> Result<()> {
        sqlx::query("UPDATE turns SET evaluation_json = ? WHERE id = ?")
            .bind(evaluation_json)
            .bind(turn_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Clear all turns and the summary but keep the session record.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM summaries WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn turn_count(&self, session_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn summary_watermark(&self, session_id: &str) -> Result<i64> {
        let mark: Option<i64> =
            sqlx::query_scalar("SELECT upto_turn_index FROM summaries WHERE session_id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(mark.unwrap_or(0))
    }

    async fn save_summary(
        &self,
        session_id: &str,
        upto_turn_index: i64,
        summary_text: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summaries (session_id, upto_turn_index, summary_text, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                upto_turn_index = excluded.upto_turn_index,
                summary_text = excluded.summary_text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(upto_turn_index)
        .bind(summary_text)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when enough turns have accumulated past the last summary to
    /// warrant a new one.
    pub async fn needs_summary(
        &self,
        session_id: &str,
        config: &SummarizationConfig,
    ) -> Result<bool> {
        if !config.enabled {
            return Ok(false);
        }
        let total = self.turn_count(session_id).await? as i64;
        let mark = self.summary_watermark(session_id).await?;
        Ok(total - mark >= config.after_turns as i64)
    }

    /// Condense everything up to the current turn count into one summary
    /// row. Best-effort: callers run this detached, and any failure is
    /// logged rather than surfaced.
    pub async fn summarize_session(
        &self,
        chat: &dyn ChatApi,
        session_id: &str,
        config: &SummarizationConfig,
    ) {
        if let Err(e) = self.try_summarize(chat, session_id, config).await {
            warn!(session_id, error = %e, "background summarization failed");
        }
    }

    async fn try_summarize(
        &self,
        chat: &dyn ChatApi,
        session_id: &str,
        config: &SummarizationConfig,
    ) -> Result<()> {
        let (turns, _) = self.load(session_id).await?;
        if turns.is_empty() {
            return Ok(());
        }
        let upto = turns.len() as i64;

        let transcript: String = turns
            .iter()
            .map(|t| {
                let label = match t.role {
                    TurnRole::User => "User",
                    TurnRole::Assistant => "Assistant",
                };
                format!("{}: {}", label, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Summarize the following legal assistance conversation in at most {} words. \
             Keep every legal term, article number and act name that was discussed. \
             Write it as a compact narrative, not a transcript.\n\n{}",
            config.max_summary_tokens, transcript
        );
        // Model tokens run shorter than words, so the cap carries
        // headroom over the word limit stated in the prompt.
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            temperature: 0.2,
            max_tokens: (config.max_summary_tokens.max(1) * 2) as u32,
        };

        let raw = chat.complete(request).await?;
        let summary_text = truncate_tokens(raw.trim(), config.max_summary_tokens);
        self.save_summary(session_id, upto, &summary_text).await?;
        debug!(session_id, upto, "conversation summary refreshed");
        Ok(())
    }
}
