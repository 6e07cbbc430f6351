//! Archive statistics.
//!
//! A quick summary of what's stored: conversation/message/link counts,
//! embedding coverage, and per-project breakdowns. Used by `atlas stats`
//! and `GET /api/v1/stats` to give confidence that imports and linking
//! passes are working as expected.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Serialize)]
pub struct ArchiveStats {
    pub conversations: i64,
    pub messages: i64,
    pub embedded: i64,
    pub links_by_kind: Vec<KindCount>,
    pub projects: Vec<ProjectStats>,
    pub db_size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct KindCount {
    pub kind: String,
    /// Undirected relation count (mirror rows counted once).
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectStats {
    pub project_path: String,
    pub conversation_count: i64,
    pub message_count: i64,
}

/// Collect archive totals.
pub async fn collect_stats(config: &Config, pool: &SqlitePool) -> Result<ArchiveStats> {
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
        .fetch_one(pool)
        .await?;

    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await?;

    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(pool)
        .await?;

    // Mirror rows make every relation count twice; halve for the report.
    let kind_rows = sqlx::query(
        "SELECT kind, COUNT(*) / 2 AS pair_count FROM links GROUP BY kind ORDER BY kind",
    )
    .fetch_all(pool)
    .await?;
    let links_by_kind = kind_rows
        .iter()
        .map(|row| KindCount {
            kind: row.get("kind"),
            count: row.get("pair_count"),
        })
        .collect();

    let project_rows = sqlx::query(
        r#"
        SELECT c.project_path,
               COUNT(DISTINCT c.id) AS conversation_count,
               COUNT(m.id) AS message_count
        FROM conversations c
        LEFT JOIN messages m ON m.conversation_id = c.id
        WHERE c.project_path IS NOT NULL AND c.project_path != ''
        GROUP BY c.project_path
        ORDER BY conversation_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    let projects = project_rows
        .iter()
        .map(|row| ProjectStats {
            project_path: row.get("project_path"),
            conversation_count: row.get("conversation_count"),
            message_count: row.get("message_count"),
        })
        .collect();

    let db_size_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(ArchiveStats {
        conversations,
        messages,
        embedded,
        links_by_kind,
        projects,
        db_size_bytes,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(config, &pool).await?;

    println!("Chat Atlas — Archive Stats");
    println!("==========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(stats.db_size_bytes));
    println!();
    println!("  Conversations: {}", stats.conversations);
    println!("  Messages:      {}", stats.messages);
    println!(
        "  Embedded:      {} / {} ({}%)",
        stats.embedded,
        stats.conversations,
        if stats.conversations > 0 {
            (stats.embedded * 100) / stats.conversations
        } else {
            0
        }
    );

    if !stats.links_by_kind.is_empty() {
        println!();
        println!("  Links:");
        for kc in &stats.links_by_kind {
            println!("    {:<14} {}", kc.kind, kc.count);
        }
    }

    if !stats.projects.is_empty() {
        println!();
        println!("  By project:");
        println!("  {:<40} {:>6} {:>9}", "PROJECT", "CONVS", "MESSAGES");
        println!("  {}", "-".repeat(58));
        for p in &stats.projects {
            println!(
                "  {:<40} {:>6} {:>9}",
                p.project_path, p.conversation_count, p.message_count
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
