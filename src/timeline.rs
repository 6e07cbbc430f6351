//! Timeline data.
//!
//! Buckets conversations by calendar day for the timeline view: each day
//! carries its conversation count and the conversations that started then.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Serialize)]
pub struct TimelineDay {
    pub date: String,
    pub count: i64,
    pub conversations: Vec<TimelineEntry>,
}

#[derive(Debug, Serialize)]
pub struct TimelineEntry {
    pub id: String,
    pub title: Option<String>,
    pub project_path: Option<String>,
    pub started_at: i64,
    pub total_messages: i64,
}

/// Group conversations into per-day buckets, newest day first.
pub async fn timeline(
    pool: &SqlitePool,
    since: Option<i64>,
    until: Option<i64>,
) -> Result<Vec<TimelineDay>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, project_path, started_at, total_messages,
               date(started_at, 'unixepoch') AS day
        FROM conversations
        WHERE (? IS NULL OR started_at >= ?) AND (? IS NULL OR started_at <= ?)
        ORDER BY started_at DESC, id ASC
        "#,
    )
    .bind(since)
    .bind(since)
    .bind(until)
    .bind(until)
    .fetch_all(pool)
    .await?;

    let mut days: Vec<TimelineDay> = Vec::new();
    for row in &rows {
        let day: String = row.get("day");
        let entry = TimelineEntry {
            id: row.get("id"),
            title: row.get("title"),
            project_path: row.get("project_path"),
            started_at: row.get("started_at"),
            total_messages: row.get("total_messages"),
        };

        match days.last_mut() {
            Some(last) if last.date == day => {
                last.count += 1;
                last.conversations.push(entry);
            }
            _ => days.push(TimelineDay {
                date: day,
                count: 1,
                conversations: vec![entry],
            }),
        }
    }

    Ok(days)
}

/// CLI entry point for `atlas timeline`.
pub async fn run_timeline(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let days = timeline(&pool, None, None).await?;

    if days.is_empty() {
        println!("No conversations.");
        pool.close().await;
        return Ok(());
    }

    for day in &days {
        println!("{} ({})", day.date, day.count);
        for conv in &day.conversations {
            println!(
                "  {}  {}",
                conv.title.as_deref().unwrap_or("(untitled)"),
                conv.id
            );
        }
    }

    pool.close().await;
    Ok(())
}
