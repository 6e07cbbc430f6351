use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create conversations table. The UNIQUE(started_at, project_path) pair
    // is the import-dedup key: re-importing the same export is a no-op.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            title TEXT,
            started_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            project_path TEXT,
            summary TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            total_messages INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            source_format TEXT,
            source_hash TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            imported_at INTEGER NOT NULL,
            UNIQUE(started_at, project_path)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create messages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            tokens_used INTEGER,
            tool_calls_json TEXT,
            file_refs_json TEXT NOT NULL DEFAULT '[]',
            UNIQUE(conversation_id, seq),
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // One feature vector per conversation, little-endian f32 BLOB.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            conversation_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            text_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Directed link rows; a bidirectional relation is two mirror rows.
    // The primary key makes every linking pass insert-or-ignore idempotent.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS links (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            score REAL,
            reason TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (from_id, to_id, kind),
            FOREIGN KEY (from_id) REFERENCES conversations(id),
            FOREIGN KEY (to_id) REFERENCES conversations(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create FTS5 virtual table over message content
    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='messages_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE messages_fts USING fts5(
                message_id UNINDEXED,
                conversation_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_started_at ON conversations(started_at DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project_path)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_to_id ON links(to_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
