//! Conversation retrieval and lifecycle.
//!
//! Listing with pagination and filters, detail with messages, cascade
//! delete, and on-demand similarity ranking. Used by both the CLI and the
//! HTTP API.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embed;
use crate::embedding;
use crate::models::{Conversation, Message, SearchResult};

/// Filters for `list_conversations`.
#[derive(Debug, Default, Clone)]
pub struct ListOptions {
    pub page: i64,
    pub size: i64,
    pub project: Option<String>,
    pub tag: Option<String>,
    pub query: Option<String>,
}

/// One page of conversation summaries.
#[derive(Debug, Serialize)]
pub struct ConversationPage {
    pub items: Vec<Conversation>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub pages: i64,
}

/// List conversations, most recent first.
pub async fn list_conversations(pool: &SqlitePool, opts: &ListOptions) -> Result<ConversationPage> {
    let page = opts.page.max(1);
    let size = opts.size.clamp(1, 100);
    let offset = (page - 1) * size;

    const FILTER: &str = r#"
        (?1 IS NULL OR project_path LIKE '%' || ?1 || '%')
        AND (?2 IS NULL OR tags_json LIKE '%"' || ?2 || '"%')
        AND (?3 IS NULL OR title LIKE '%' || ?3 || '%' OR summary LIKE '%' || ?3 || '%')
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM conversations WHERE {}", FILTER);
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(&opts.project)
        .bind(&opts.tag)
        .bind(&opts.query)
        .fetch_one(pool)
        .await?;

    let list_sql = format!(
        r#"
        SELECT id, title, started_at, updated_at, project_path, summary, tags_json,
               total_messages, total_tokens, source_format, imported_at
        FROM conversations
        WHERE {}
        ORDER BY started_at DESC, id ASC
        LIMIT ?4 OFFSET ?5
        "#,
        FILTER
    );
    let rows = sqlx::query(&list_sql)
        .bind(&opts.project)
        .bind(&opts.tag)
        .bind(&opts.query)
        .bind(size)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let items = rows.iter().map(row_to_conversation).collect();

    Ok(ConversationPage {
        items,
        total,
        page,
        size,
        pages: (total + size - 1) / size,
    })
}

/// Fetch one conversation. Returns `None` when the id is unknown.
pub async fn get_conversation(pool: &SqlitePool, id: &str) -> Result<Option<Conversation>> {
    let row = sqlx::query(
        r#"
        SELECT id, title, started_at, updated_at, project_path, summary, tags_json,
               total_messages, total_tokens, source_format, imported_at
        FROM conversations WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_conversation))
}

/// Fetch a conversation's messages in turn order, optionally filtered by
/// role, with offset pagination.
pub async fn get_messages(
    pool: &SqlitePool,
    conversation_id: &str,
    role: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        r#"
        SELECT id, conversation_id, seq, role, content, timestamp, tokens_used,
               tool_calls_json, file_refs_json
        FROM messages
        WHERE conversation_id = ? AND (? IS NULL OR role = ?)
        ORDER BY seq ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(conversation_id)
    .bind(role)
    .bind(role)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_message).collect())
}

/// Delete a conversation and everything hanging off it, in one transaction.
/// Returns false when the id is unknown.
pub async fn delete_conversation(pool: &SqlitePool, id: &str) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Ok(false);
    }

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM links WHERE from_id = ? OR to_id = ?")
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM embeddings WHERE conversation_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM messages_fts WHERE conversation_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM conversations WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Rank all other conversations by similarity to the given one.
///
/// Compares the stored vectors directly (no new embedding work) and keeps
/// results at or above the threshold.
pub async fn find_similar(
    config: &Config,
    pool: &SqlitePool,
    conversation_id: &str,
    limit: usize,
    threshold: f64,
) -> Result<Vec<SearchResult>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let vectors = embed::load_vectors(pool, provider.model_name()).await?;

    let own = match vectors
        .iter()
        .find(|(id, _)| id == conversation_id)
        .map(|(_, v)| v.clone())
    {
        Some(v) => v,
        None => bail!("no stored vector for conversation: {}", conversation_id),
    };

    let mut scored: Vec<(String, f64)> = vectors
        .iter()
        .filter(|(id, _)| id != conversation_id)
        .map(|(id, v)| (id.clone(), embedding::cosine_similarity(&own, v) as f64))
        .filter(|(_, sim)| *sim >= threshold)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.truncate(limit);

    let mut results = Vec::with_capacity(scored.len());
    for (id, sim) in scored {
        if let Some(conv) = get_conversation(pool, &id).await? {
            results.push(SearchResult {
                id: conv.id,
                title: conv.title,
                project_path: conv.project_path,
                started_at: conv.started_at,
                score: sim,
                snippet: conv.summary.map(|s| s.chars().take(240).collect()).unwrap_or_default(),
            });
        }
    }

    Ok(results)
}

/// CLI entry point for `atlas list`.
pub async fn run_list(config: &Config, opts: &ListOptions) -> Result<()> {
    let pool = db::connect(config).await?;
    let page = list_conversations(&pool, opts).await?;

    if page.items.is_empty() {
        println!("No conversations.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "conversations (page {} of {}, {} total)",
        page.page, page.pages, page.total
    );
    for conv in &page.items {
        let date = chrono::DateTime::from_timestamp(conv.started_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "  {}  {}  [{} msgs]  {}",
            date,
            conv.title.as_deref().unwrap_or("(untitled)"),
            conv.total_messages,
            conv.id
        );
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `atlas show <id>`.
pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    let conv = match get_conversation(&pool, id).await? {
        Some(c) => c,
        None => {
            pool.close().await;
            bail!("conversation not found: {}", id);
        }
    };
    let messages = get_messages(&pool, id, None, i64::MAX, 0).await?;

    println!("--- Conversation ---");
    println!("id:           {}", conv.id);
    println!(
        "title:        {}",
        conv.title.as_deref().unwrap_or("(untitled)")
    );
    if let Some(ref project) = conv.project_path {
        println!("project:      {}", project);
    }
    println!("started_at:   {}", format_ts_iso(conv.started_at));
    println!("updated_at:   {}", format_ts_iso(conv.updated_at));
    println!("messages:     {}", conv.total_messages);
    println!("tokens:       {}", conv.total_tokens);
    if !conv.tags.is_empty() {
        println!("tags:         {}", conv.tags.join(", "));
    }
    println!();

    for msg in &messages {
        println!("[{} — {}]", msg.role, format_ts_iso(msg.timestamp));
        println!("{}", msg.content);
        println!();
    }

    pool.close().await;
    Ok(())
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    let tags_json: String = row.get("tags_json");
    Conversation {
        id: row.get("id"),
        title: row.get("title"),
        started_at: row.get("started_at"),
        updated_at: row.get("updated_at"),
        project_path: row.get("project_path"),
        summary: row.get("summary"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        total_messages: row.get("total_messages"),
        total_tokens: row.get("total_tokens"),
        source_format: row.get("source_format"),
        imported_at: row.get("imported_at"),
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    let tool_calls_json: Option<String> = row.get("tool_calls_json");
    let file_refs_json: String = row.get("file_refs_json");
    Message {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        seq: row.get("seq"),
        role: row.get("role"),
        content: row.get("content"),
        timestamp: row.get("timestamp"),
        tokens_used: row.get("tokens_used"),
        tool_calls: tool_calls_json.and_then(|s| serde_json::from_str(&s).ok()),
        file_refs: serde_json::from_str(&file_refs_json).unwrap_or_default(),
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
