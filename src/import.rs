//! Import pipeline orchestration.
//!
//! Coordinates the full import flow: parse export file → normalize →
//! store conversation + messages + FTS rows → inline embedding (non-fatal
//! on failure). Directory imports continue past per-file failures and
//! report an aggregate summary.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::embed;
use crate::formats;
use crate::models::ParsedConversation;
use std::path::Path;

/// Outcome of importing a single export file.
#[derive(Debug)]
pub enum ImportOutcome {
    Imported {
        conversation_id: String,
        total_messages: usize,
        skipped_entries: usize,
    },
    AlreadyExists {
        conversation_id: String,
    },
}

/// Aggregate report for a directory import.
#[derive(Debug, Default)]
pub struct DirReport {
    pub total_files: usize,
    pub imported: usize,
    pub already_existing: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Import a single export file. Used by both the CLI and the HTTP API.
pub async fn import_file(
    config: &Config,
    pool: &SqlitePool,
    path: &Path,
    project_path: Option<&str>,
) -> Result<ImportOutcome> {
    if !path.exists() {
        bail!("file not found: {}", path.display());
    }

    let now = Utc::now();
    let parsed = formats::parse_export(path, now)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    // CLI/API argument wins over whatever the log recorded.
    let project = project_path
        .map(|p| p.to_string())
        .or_else(|| parsed.project_path.clone());

    // Dedup key: a conversation that started at the same instant in the same
    // project is the same conversation.
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM conversations WHERE started_at = ? AND project_path IS ?",
    )
    .bind(parsed.started_at.timestamp())
    .bind(&project)
    .fetch_optional(pool)
    .await?;

    if let Some(id) = existing {
        return Ok(ImportOutcome::AlreadyExists {
            conversation_id: id,
        });
    }

    let source_hash = file_hash(path)?;
    let conversation_id =
        store_conversation(pool, &parsed, project.as_deref(), &source_hash).await?;

    // Inline embedding; failures leave the vector for `embed pending`.
    if config.embedding.is_enabled() {
        if let Err(e) = embed::embed_conversation(config, pool, &conversation_id).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "inline embedding failed");
        }
    }

    Ok(ImportOutcome::Imported {
        conversation_id,
        total_messages: parsed.messages.len(),
        skipped_entries: parsed.skipped_entries,
    })
}

/// CLI entry point for `atlas import file`.
pub async fn run_import_file(
    config: &Config,
    path: &Path,
    project_path: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let outcome = import_file(config, &pool, path, project_path.as_deref()).await?;

    match outcome {
        ImportOutcome::Imported {
            conversation_id,
            total_messages,
            skipped_entries,
        } => {
            println!("import {}", path.display());
            println!("  conversation: {}", conversation_id);
            println!("  messages: {}", total_messages);
            if skipped_entries > 0 {
                println!("  skipped entries: {}", skipped_entries);
            }
            println!("ok");
        }
        ImportOutcome::AlreadyExists { conversation_id } => {
            println!("import {}", path.display());
            println!("  already exists: {}", conversation_id);
        }
    }

    pool.close().await;
    Ok(())
}

/// Import every matching export file under a directory.
pub async fn import_directory(
    config: &Config,
    pool: &SqlitePool,
    dir: &Path,
    project_path: Option<&str>,
) -> Result<DirReport> {
    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    let include_set = build_globset(&config.import.include_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if include_set.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    // Sort for deterministic ordering
    files.sort();

    let mut report = DirReport {
        total_files: files.len(),
        ..Default::default()
    };

    for file in &files {
        match import_file(config, pool, file, project_path).await {
            Ok(ImportOutcome::Imported { .. }) => report.imported += 1,
            Ok(ImportOutcome::AlreadyExists { .. }) => report.already_existing += 1,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("{}: {}", file.display(), e));
                tracing::warn!(file = %file.display(), error = %e, "import failed");
            }
        }
    }

    Ok(report)
}

/// CLI entry point for `atlas import dir`.
pub async fn run_import_dir(
    config: &Config,
    dir: &Path,
    project_path: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = import_directory(config, &pool, dir, project_path.as_deref()).await?;

    println!("import {}", dir.display());
    println!("  files found: {}", report.total_files);
    println!("  imported: {}", report.imported);
    println!("  already existing: {}", report.already_existing);
    println!("  failed: {}", report.failed);
    for err in &report.errors {
        println!("    {}", err);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Insert the conversation, its messages, and the FTS rows in one
/// transaction. Returns the new conversation id.
async fn store_conversation(
    pool: &SqlitePool,
    parsed: &ParsedConversation,
    project_path: Option<&str>,
    source_hash: &str,
) -> Result<String> {
    let conversation_id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    let total_tokens: i64 = parsed
        .messages
        .iter()
        .map(|m| m.tokens_used.unwrap_or(0))
        .sum();
    let summary = build_summary(parsed, project_path);
    let tags_json = serde_json::to_string(&parsed.tags)?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO conversations
            (id, title, started_at, updated_at, project_path, summary, tags_json,
             total_messages, total_tokens, source_format, source_hash, metadata_json, imported_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&conversation_id)
    .bind(&parsed.title)
    .bind(parsed.started_at.timestamp())
    .bind(parsed.updated_at.timestamp())
    .bind(project_path)
    .bind(&summary)
    .bind(&tags_json)
    .bind(parsed.messages.len() as i64)
    .bind(total_tokens)
    .bind(&parsed.source_format)
    .bind(source_hash)
    .bind("{}")
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (seq, msg) in parsed.messages.iter().enumerate() {
        let message_id = Uuid::new_v4().to_string();
        let timestamp = msg
            .timestamp
            .map(|t| t.timestamp())
            .unwrap_or_else(|| parsed.started_at.timestamp());
        let tool_calls_json = msg
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let file_refs_json = serde_json::to_string(&msg.file_refs)?;

        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, seq, role, content, timestamp, tokens_used,
                 tool_calls_json, file_refs_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message_id)
        .bind(&conversation_id)
        .bind(seq as i64)
        .bind(&msg.role)
        .bind(&msg.content)
        .bind(timestamp)
        .bind(msg.tokens_used)
        .bind(&tool_calls_json)
        .bind(&file_refs_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO messages_fts (message_id, conversation_id, content) VALUES (?, ?, ?)")
            .bind(&message_id)
            .bind(&conversation_id)
            .bind(&msg.content)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(conversation_id)
}

/// Build the stored summary line: title, project, the opening exchange, and
/// the files the conversation touched.
fn build_summary(parsed: &ParsedConversation, project_path: Option<&str>) -> String {
    let mut parts = Vec::new();

    if let Some(title) = &parsed.title {
        parts.push(format!("Title: {}", title));
    }
    if let Some(project) = project_path {
        parts.push(format!("Project: {}", project));
    }

    if let Some(first_user) = parsed.messages.iter().find(|m| m.role == "user") {
        parts.push(format!("Initial query: {}", truncate(&first_user.content, 500)));
    }
    if let Some(first_assistant) = parsed.messages.iter().find(|m| m.role == "assistant") {
        parts.push(format!(
            "Response approach: {}",
            truncate(&first_assistant.content, 300)
        ));
    }

    let mut files: Vec<&str> = Vec::new();
    for msg in &parsed.messages {
        for f in &msg.file_refs {
            if !files.contains(&f.as_str()) {
                files.push(f);
            }
            if files.len() >= 10 {
                break;
            }
        }
        if files.len() >= 10 {
            break;
        }
    }
    if !files.is_empty() {
        parts.push(format!("Files mentioned: {}", files.join(", ")));
    }

    parts.join(" | ")
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn file_hash(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
