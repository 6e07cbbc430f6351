//! Conversation embedding maintenance.
//!
//! One feature vector is stored per conversation, derived from its title,
//! project, and full message text. `embed pending` backfills missing or
//! stale vectors (detected by text hash); `embed rebuild` clears and
//! regenerates everything, which is the right move after changing the
//! feature layout or provider.

use anyhow::{bail, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;

/// A conversation whose stored vector is missing or out of date.
pub struct PendingConversation {
    pub conversation_id: String,
    pub embed_text: String,
    pub text_hash: String,
}

/// Build the text a conversation's feature vector is computed over:
/// title, project path, and every message body in order.
pub async fn embed_text_for(pool: &SqlitePool, conversation_id: &str) -> Result<String> {
    let row = sqlx::query("SELECT title, project_path FROM conversations WHERE id = ?")
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;

    let row = match row {
        Some(r) => r,
        None => bail!("conversation not found: {}", conversation_id),
    };

    let title: Option<String> = row.get("title");
    let project_path: Option<String> = row.get("project_path");

    let content_rows =
        sqlx::query("SELECT content FROM messages WHERE conversation_id = ? ORDER BY seq ASC")
            .bind(conversation_id)
            .fetch_all(pool)
            .await?;

    let mut parts = Vec::with_capacity(content_rows.len() + 2);
    if let Some(t) = title {
        parts.push(t);
    }
    if let Some(p) = project_path {
        parts.push(p);
    }
    for row in &content_rows {
        parts.push(row.get("content"));
    }

    Ok(parts.join("\n"))
}

pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Generate and store the vector for a single conversation.
pub async fn embed_conversation(
    config: &Config,
    pool: &SqlitePool,
    conversation_id: &str,
) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    let text = embed_text_for(pool, conversation_id).await?;
    let hash = text_hash(&text);

    let vector = embedding::embed_query(provider.as_ref(), &config.embedding, &text).await?;
    let blob = embedding::vec_to_blob(&vector);

    upsert_embedding(
        pool,
        conversation_id,
        provider.model_name(),
        vector.len(),
        &hash,
        &blob,
    )
    .await
}

/// Find conversations whose vector is missing, built by another model, or
/// stale (text hash mismatch).
pub async fn find_pending(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingConversation>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, e.model AS emb_model, e.text_hash AS emb_hash
        FROM conversations c
        LEFT JOIN embeddings e ON e.conversation_id = c.id
        ORDER BY c.started_at ASC, c.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::new();
    for row in &rows {
        let id: String = row.get("id");
        let emb_model: Option<String> = row.get("emb_model");
        let emb_hash: Option<String> = row.get("emb_hash");

        let text = embed_text_for(pool, &id).await?;
        let hash = text_hash(&text);

        let up_to_date = emb_model.as_deref() == Some(model) && emb_hash.as_deref() == Some(&hash);
        if !up_to_date {
            pending.push(PendingConversation {
                conversation_id: id,
                embed_text: text,
                text_hash: hash,
            });
            if let Some(lim) = limit {
                if pending.len() >= lim {
                    break;
                }
            }
        }
    }

    Ok(pending)
}

/// Embed every pending conversation. Returns `(embedded, failed)`.
///
/// Batch failures are logged and skipped so one bad batch never aborts the
/// backfill; the next `embed pending` run picks those conversations up
/// again.
pub async fn embed_pending(
    config: &Config,
    pool: &SqlitePool,
    limit: Option<usize>,
) -> Result<(u64, u64)> {
    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let batch_size = config.embedding.batch_size;

    let pending = find_pending(pool, &model_name, limit).await?;

    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.embed_text.clone()).collect();

        match embedding::embed_texts(provider.as_ref(), &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    upsert_embedding(
                        pool,
                        &item.conversation_id,
                        &model_name,
                        vec.len(),
                        &item.text_hash,
                        &blob,
                    )
                    .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding batch failed");
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}

/// CLI entry point for `atlas embed pending`.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;

    if dry_run {
        let provider = embedding::create_provider(&config.embedding)?;
        let pending = find_pending(&pool, provider.model_name(), limit).await?;
        println!("embed pending (dry-run)");
        println!("  conversations needing vectors: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) = embed_pending(config, &pool, limit).await?;

    println!("embed pending");
    if embedded == 0 && failed == 0 {
        println!("  all conversations up to date");
    } else {
        println!("  embedded: {}", embedded);
        println!("  failed: {}", failed);
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `atlas embed rebuild`.
pub async fn run_embed_rebuild(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;

    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;
    println!("embed rebuild — cleared existing vectors");

    let (embedded, failed) = embed_pending(config, &pool, None).await?;

    println!("embed rebuild");
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Load all stored vectors for a model, ordered by conversation id.
pub async fn load_vectors(pool: &SqlitePool, model: &str) -> Result<Vec<(String, Vec<f32>)>> {
    let rows = sqlx::query(
        "SELECT conversation_id, vector FROM embeddings WHERE model = ? ORDER BY conversation_id ASC",
    )
    .bind(model)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("vector");
            (row.get("conversation_id"), embedding::blob_to_vec(&blob))
        })
        .collect())
}

async fn upsert_embedding(
    pool: &SqlitePool,
    conversation_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO embeddings (conversation_id, model, dims, vector, text_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(conversation_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            vector = excluded.vector,
            text_hash = excluded.text_hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(conversation_id)
    .bind(model)
    .bind(dims as i64)
    .bind(blob)
    .bind(text_hash)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
