use anyhow::Result;
use sqlx::SqlitePool;

/// Create the conversation schema if it does not exist yet. Safe to run
/// on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS turns (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            turn_index INTEGER NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            context_summary TEXT,
            created_at INTEGER NOT NULL,
            debug_json TEXT,
            evaluation_json TEXT,
            UNIQUE(session_id, turn_index),
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            session_id TEXT PRIMARY KEY,
            upto_turn_index INTEGER NOT NULL,
            summary_text TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, turn_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
