//! Core data models used throughout Chat Atlas.
//!
//! These types represent the conversations, messages, and links that flow
//! through the import, linking, and search pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A conversation parsed from an export file, before it is stored.
#[derive(Debug, Clone)]
pub struct ParsedConversation {
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_path: Option<String>,
    pub tags: Vec<String>,
    pub source_format: String,
    pub messages: Vec<ParsedMessage>,
    /// Count of lines or entries the parser could not make sense of.
    pub skipped_entries: usize,
}

/// A single message parsed from an export file.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub role: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub tokens_used: Option<i64>,
    pub tool_calls: Option<serde_json::Value>,
    pub file_refs: Vec<String>,
}

/// Normalized conversation row stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub started_at: i64,
    pub updated_at: i64,
    pub project_path: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub source_format: Option<String>,
    pub imported_at: i64,
}

/// One turn within a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub seq: i64,
    pub role: String,
    pub content: String,
    pub timestamp: i64,
    pub tokens_used: Option<i64>,
    pub tool_calls: Option<serde_json::Value>,
    pub file_refs: Vec<String>,
}

/// A typed, scored, directed relation between two conversations.
///
/// Bidirectional relations are stored as two mirror rows keyed by
/// `(from_id, to_id, kind)`.
#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub from_id: String,
    pub to_id: String,
    pub kind: String,
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub created_at: i64,
}

/// A search result at conversation granularity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: Option<String>,
    pub project_path: Option<String>,
    pub started_at: i64,
    pub score: f64,
    pub snippet: String,
}

/// Link kind for similarity links produced by the auto-linker.
pub const LINK_KIND_SIMILAR: &str = "similar";
/// Link kind for temporally adjacent conversations in the same project.
pub const LINK_KIND_CONTINUATION: &str = "continuation";
/// Link kind for user-created links.
pub const LINK_KIND_MANUAL: &str = "manual";
