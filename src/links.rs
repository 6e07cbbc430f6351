//! Link storage.
//!
//! A link is a typed, scored relation between two conversations. Relations
//! are bidirectional, stored as two mirror rows keyed by
//! `(from_id, to_id, kind)`; inserts are insert-or-ignore, so every linking
//! pass is idempotent.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::{Link, LINK_KIND_MANUAL};

/// Insert both directions of a link. Returns the number of rows actually
/// inserted (0 when the pair was already linked with this kind).
pub async fn create_mirror(
    pool: &SqlitePool,
    a: &str,
    b: &str,
    kind: &str,
    score: Option<f64>,
    reason: Option<&str>,
) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for (from, to) in [(a, b), (b, a)] {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO links (from_id, to_id, kind, score, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(kind)
        .bind(score)
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Delete both directions of a link. With `kind = None`, every kind between
/// the pair is removed. Returns the number of rows deleted.
pub async fn delete_mirror(
    pool: &SqlitePool,
    a: &str,
    b: &str,
    kind: Option<&str>,
) -> Result<u64> {
    let result = match kind {
        Some(k) => {
            sqlx::query(
                "DELETE FROM links WHERE kind = ? AND \
                 ((from_id = ? AND to_id = ?) OR (from_id = ? AND to_id = ?))",
            )
            .bind(k)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "DELETE FROM links WHERE \
                 (from_id = ? AND to_id = ?) OR (from_id = ? AND to_id = ?)",
            )
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected())
}

/// All links touching a conversation, outgoing rows first, best score first.
pub async fn links_for(pool: &SqlitePool, conversation_id: &str) -> Result<Vec<Link>> {
    let rows = sqlx::query(
        r#"
        SELECT from_id, to_id, kind, score, reason, created_at
        FROM links
        WHERE from_id = ? OR to_id = ?
        ORDER BY (from_id = ?) DESC, score DESC, created_at DESC
        "#,
    )
    .bind(conversation_id)
    .bind(conversation_id)
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_link).collect())
}

/// Every link row in the archive, for the graph view.
pub async fn all_links(pool: &SqlitePool) -> Result<Vec<Link>> {
    let rows = sqlx::query(
        "SELECT from_id, to_id, kind, score, reason, created_at FROM links \
         ORDER BY from_id ASC, to_id ASC, kind ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_link).collect())
}

pub async fn conversation_exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// CLI entry point for `atlas link add`.
pub async fn run_link_add(
    config: &Config,
    from: &str,
    to: &str,
    kind: Option<String>,
    reason: Option<String>,
) -> Result<()> {
    if from == to {
        bail!("cannot link a conversation to itself");
    }

    let pool = db::connect(config).await?;

    for id in [from, to] {
        if !conversation_exists(&pool, id).await? {
            pool.close().await;
            bail!("conversation not found: {}", id);
        }
    }

    let kind = kind.as_deref().unwrap_or(LINK_KIND_MANUAL);
    let inserted = create_mirror(&pool, from, to, kind, None, reason.as_deref()).await?;

    if inserted > 0 {
        println!("linked {} <-> {} ({})", from, to, kind);
    } else {
        println!("already linked {} <-> {} ({})", from, to, kind);
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `atlas link rm`.
pub async fn run_link_rm(
    config: &Config,
    from: &str,
    to: &str,
    kind: Option<String>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let removed = delete_mirror(&pool, from, to, kind.as_deref()).await?;

    if removed == 0 {
        println!("no such link");
    } else {
        println!("removed {} link row(s)", removed);
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `atlas link list`.
pub async fn run_link_list(config: &Config, conversation_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;

    if !conversation_exists(&pool, conversation_id).await? {
        pool.close().await;
        bail!("conversation not found: {}", conversation_id);
    }

    let result = links_for(&pool, conversation_id).await?;
    if result.is_empty() {
        println!("No links.");
        pool.close().await;
        return Ok(());
    }

    for link in &result {
        let (arrow, other) = if link.from_id == conversation_id {
            ("->", &link.to_id)
        } else {
            ("<-", &link.from_id)
        };
        let score = link
            .score
            .map(|s| format!(" [{:.2}]", s))
            .unwrap_or_default();
        println!("  {} {} ({}){}", arrow, other, link.kind, score);
        if let Some(ref reason) = link.reason {
            println!("     reason: {}", reason);
        }
    }

    pool.close().await;
    Ok(())
}

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> Link {
    Link {
        from_id: row.get("from_id"),
        to_id: row.get("to_id"),
        kind: row.get("kind"),
        score: row.get("score"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    }
}
