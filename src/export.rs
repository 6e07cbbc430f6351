//! Markdown export.
//!
//! Renders a conversation as a markdown transcript: a title header, a
//! metadata block, and one section per message. Used by `atlas export` and
//! `GET /api/v1/conversations/{id}/export`.

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;
use crate::conversations::{self, format_ts_iso};
use crate::db;
use sqlx::SqlitePool;

/// Render a conversation as a markdown transcript.
pub async fn render_markdown(pool: &SqlitePool, conversation_id: &str) -> Result<String> {
    let conv = match conversations::get_conversation(pool, conversation_id).await? {
        Some(c) => c,
        None => bail!("conversation not found: {}", conversation_id),
    };
    let messages = conversations::get_messages(pool, conversation_id, None, i64::MAX, 0).await?;

    let mut out = String::new();

    out.push_str(&format!(
        "# {}\n\n",
        conv.title.as_deref().unwrap_or("Untitled conversation")
    ));

    out.push_str(&format!("- **Started:** {}\n", format_ts_iso(conv.started_at)));
    out.push_str(&format!("- **Updated:** {}\n", format_ts_iso(conv.updated_at)));
    if let Some(ref project) = conv.project_path {
        out.push_str(&format!("- **Project:** {}\n", project));
    }
    if !conv.tags.is_empty() {
        out.push_str(&format!("- **Tags:** {}\n", conv.tags.join(", ")));
    }
    out.push_str(&format!(
        "- **Messages:** {} ({} tokens)\n\n",
        conv.total_messages, conv.total_tokens
    ));

    for msg in &messages {
        out.push_str(&format!(
            "## {} — {}\n\n",
            capitalize(&msg.role),
            format_ts_iso(msg.timestamp)
        ));
        out.push_str(msg.content.trim_end());
        out.push_str("\n\n");

        if !msg.file_refs.is_empty() {
            out.push_str(&format!("*Files: {}*\n\n", msg.file_refs.join(", ")));
        }
    }

    Ok(out)
}

/// CLI entry point for `atlas export`.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes to
/// stdout for piping.
pub async fn run_export(config: &Config, conversation_id: &str, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    let markdown = render_markdown(&pool, conversation_id).await?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &markdown)?;
            eprintln!("Exported conversation {} to {}", conversation_id, path.display());
        }
        None => {
            println!("{}", markdown);
        }
    }

    pool.close().await;
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("user"), "User");
        assert_eq!(capitalize("assistant"), "Assistant");
        assert_eq!(capitalize(""), "");
    }
}
