//! Export-format parsing heuristics.
//!
//! Assistant conversation exports come in several loosely documented shapes:
//! a JSON object with a `messages` array (with string or content-block
//! bodies), and JSONL session logs with one record per line, either bare
//! `{role, content}` objects or wrapped `{type, message}` records. The
//! parsers here normalize all of them into [`ParsedConversation`].

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use crate::models::{ParsedConversation, ParsedMessage};

/// Parse an export file, dispatching on its extension.
///
/// `now` is used as the fallback for missing timestamps so parsing stays
/// deterministic under test.
pub fn parse_export(path: &Path, now: DateTime<Utc>) -> Result<ParsedConversation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read export file: {}", path.display()))?;

    let is_jsonl = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);

    if is_jsonl {
        parse_jsonl(&content, now)
    } else {
        let data: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        parse_json(&data, now)
    }
}

/// Parse a JSON export object: `{title?, created_at?, tags?, messages: [...]}`.
pub fn parse_json(data: &Value, now: DateTime<Utc>) -> Result<ParsedConversation> {
    let raw_messages = data
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| anyhow::anyhow!("Export has no 'messages' array"))?;

    let mut messages = Vec::new();
    let mut skipped = 0usize;
    for raw in raw_messages {
        match parse_message(raw) {
            Some(msg) => messages.push(msg),
            None => skipped += 1,
        }
    }

    // Title: explicit field, or the first user message truncated.
    let title = data
        .get("title")
        .and_then(|t| t.as_str())
        .or_else(|| data.get("name").and_then(|n| n.as_str()))
        .map(|s| s.to_string())
        .or_else(|| title_from_messages(&messages));

    // Timestamps: explicit fields, then first/last message, then now.
    let started_at = data
        .get("created_at")
        .or_else(|| data.get("timestamp"))
        .and_then(parse_timestamp_value)
        .or_else(|| messages.first().and_then(|m| m.timestamp))
        .unwrap_or(now);

    let updated_at = data
        .get("updated_at")
        .and_then(parse_timestamp_value)
        .or_else(|| messages.last().and_then(|m| m.timestamp))
        .unwrap_or(started_at);

    Ok(ParsedConversation {
        title,
        started_at,
        updated_at,
        project_path: None,
        tags: parse_tags(data.get("tags")),
        source_format: "json".to_string(),
        messages,
        skipped_entries: skipped,
    })
}

/// Parse a JSONL session log: one JSON object per line.
///
/// Accepts bare `{role, content}` records and wrapped
/// `{type: "user"|"assistant", message: {...}}` records. `summary` records
/// name the conversation; a `cwd` field names the project. Unparseable
/// lines are counted and skipped.
pub fn parse_jsonl(content: &str, now: DateTime<Utc>) -> Result<ParsedConversation> {
    let mut messages = Vec::new();
    let mut skipped = 0usize;
    let mut title: Option<String> = None;
    let mut project_path: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };

        // Session metadata records.
        if record.get("type").and_then(|t| t.as_str()) == Some("summary") {
            if let Some(s) = record.get("summary").and_then(|s| s.as_str()) {
                title = Some(s.to_string());
            }
            continue;
        }
        if project_path.is_none() {
            if let Some(cwd) = record.get("cwd").and_then(|c| c.as_str()) {
                project_path = Some(cwd.to_string());
            }
        }

        // Wrapped records carry the message under a `message` key; the outer
        // record often holds the timestamp.
        let (msg_value, outer_ts) = match record.get("message") {
            Some(inner) => (inner, record.get("timestamp")),
            None => (&record, None),
        };

        match parse_message(msg_value) {
            Some(mut msg) => {
                if msg.timestamp.is_none() {
                    msg.timestamp = outer_ts.and_then(parse_timestamp_value);
                }
                messages.push(msg);
            }
            None => {
                // Non-message records (tool results, progress events) are
                // expected in session logs; only count lines that looked like
                // messages but failed to parse.
                if msg_value.get("role").is_some() {
                    skipped += 1;
                }
            }
        }
    }

    if messages.is_empty() {
        bail!("JSONL log contains no parseable messages");
    }

    let started_at = messages
        .first()
        .and_then(|m| m.timestamp)
        .unwrap_or(now);
    let updated_at = messages
        .last()
        .and_then(|m| m.timestamp)
        .unwrap_or(started_at);

    let title = title.or_else(|| title_from_messages(&messages));

    Ok(ParsedConversation {
        title,
        started_at,
        updated_at,
        project_path,
        tags: Vec::new(),
        source_format: "jsonl".to_string(),
        messages,
        skipped_entries: skipped,
    })
}

/// Parse a single message object. Returns `None` for records that are not
/// messages or have empty content.
fn parse_message(raw: &Value) -> Option<ParsedMessage> {
    let obj = raw.as_object()?;

    let role = match obj.get("role").and_then(|r| r.as_str()) {
        Some(r @ ("user" | "assistant" | "system")) => r.to_string(),
        Some(_) => "unknown".to_string(),
        None => return None,
    };

    let content = flatten_content(obj.get("content")?)?;
    if content.trim().is_empty() {
        return None;
    }

    let timestamp = obj.get("timestamp").and_then(parse_timestamp_value);

    let tool_calls = obj
        .get("tool_calls")
        .or_else(|| obj.get("function_calls"))
        .filter(|v| !v.is_null())
        .cloned();

    let file_refs = match obj.get("file_references").and_then(|f| f.as_array()) {
        Some(refs) => refs
            .iter()
            .filter_map(|r| r.as_str().map(|s| s.to_string()))
            .collect(),
        None => extract_file_references(&content),
    };

    // Rough token estimation when the export has no usage data.
    let tokens_used = obj
        .get("tokens_used")
        .and_then(|t| t.as_i64())
        .or_else(|| Some((content.len() as i64 / 4).max(1)));

    Some(ParsedMessage {
        role,
        content,
        timestamp,
        tokens_used,
        tool_calls,
        file_refs,
    })
}

/// Flatten message content that may be a string or an array of content
/// blocks (`{text}` or `{content}` objects).
fn flatten_content(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let mut pieces = Vec::new();
            for part in parts {
                match part {
                    Value::Object(map) => {
                        if let Some(text) = map.get("text").and_then(|t| t.as_str()) {
                            pieces.push(text.to_string());
                        } else if let Some(inner) = map.get("content") {
                            if let Some(text) = flatten_content(inner) {
                                pieces.push(text);
                            }
                        }
                    }
                    Value::String(s) => pieces.push(s.clone()),
                    _ => {}
                }
            }
            if pieces.is_empty() {
                None
            } else {
                Some(pieces.join("\n"))
            }
        }
        _ => None,
    }
}

fn title_from_messages(messages: &[ParsedMessage]) -> Option<String> {
    let first_user = messages.iter().find(|m| m.role == "user")?;
    let content = first_user.content.trim();
    let truncated: String = content.chars().take(100).collect();
    if truncated.len() < content.len() {
        Some(format!("{}...", truncated))
    } else {
        Some(truncated)
    }
}

fn parse_tags(tags: Option<&Value>) -> Vec<String> {
    match tags {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|t| t.as_str().map(|s| s.to_string()))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Parse a timestamp JSON value: a string in one of several formats, or a
/// Unix epoch number (seconds or milliseconds).
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            // Heuristic: values this large are milliseconds.
            let secs = if secs > 1e12 { secs / 1000.0 } else { secs };
            DateTime::from_timestamp(secs as i64, 0)
        }
        _ => None,
    }
}

/// Parse various timestamp string formats, RFC3339 first.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    // Unix epoch as a string.
    if let Ok(secs) = s.parse::<f64>() {
        let secs = if secs > 1e12 { secs / 1000.0 } else { secs };
        return DateTime::from_timestamp(secs as i64, 0);
    }

    None
}

fn unix_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:\./|/)[\w][\w./-]*\.\w+").unwrap())
}

fn source_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b[\w./-]+\.(?:py|js|ts|jsx|tsx|rs|go|json|md|txt|csv|xml|html|css|scss|sql|yaml|yml|toml|ini|env)\b",
        )
        .unwrap()
    })
}

/// Extract file paths mentioned in message content.
pub fn extract_file_references(content: &str) -> Vec<String> {
    let mut refs: BTreeSet<String> = BTreeSet::new();

    for m in unix_path_re().find_iter(content) {
        refs.insert(m.as_str().to_string());
    }
    for m in source_file_re().find_iter(content) {
        refs.insert(m.as_str().to_string());
    }

    refs.into_iter().filter(|r| !r.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_json_basic() {
        let data = serde_json::json!({
            "title": "Debugging session",
            "created_at": "2025-01-15T10:00:00Z",
            "tags": ["python", "help"],
            "messages": [
                {"role": "user", "content": "Help with Python?", "timestamp": "2025-01-15T10:00:00Z"},
                {"role": "assistant", "content": "Sure.", "timestamp": "2025-01-15T10:00:30Z"}
            ]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.title.as_deref(), Some("Debugging session"));
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.tags, vec!["python", "help"]);
        assert_eq!(
            conv.started_at,
            Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
        );
        assert_eq!(
            conv.updated_at,
            Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 30).unwrap()
        );
    }

    #[test]
    fn test_parse_json_title_from_first_user_message() {
        let data = serde_json::json!({
            "messages": [
                {"role": "assistant", "content": "Hello!"},
                {"role": "user", "content": "short question"}
            ]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.title.as_deref(), Some("short question"));
    }

    #[test]
    fn test_parse_json_long_title_truncated() {
        let long = "x".repeat(150);
        let data = serde_json::json!({
            "messages": [{"role": "user", "content": long}]
        });
        let conv = parse_json(&data, now()).unwrap();
        let title = conv.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 103);
    }

    #[test]
    fn test_parse_json_content_blocks() {
        let data = serde_json::json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "part one"},
                    {"type": "text", "text": "part two"}
                ]}
            ]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.messages[0].content, "part one\npart two");
    }

    #[test]
    fn test_parse_json_empty_content_skipped() {
        let data = serde_json::json!({
            "messages": [
                {"role": "user", "content": ""},
                {"role": "user", "content": "real"}
            ]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.skipped_entries, 1);
    }

    #[test]
    fn test_parse_json_unknown_role_kept() {
        let data = serde_json::json!({
            "messages": [{"role": "tool", "content": "output"}]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.messages[0].role, "unknown");
    }

    #[test]
    fn test_parse_json_missing_messages_is_error() {
        let data = serde_json::json!({"title": "no messages"});
        assert!(parse_json(&data, now()).is_err());
    }

    #[test]
    fn test_parse_jsonl_wrapped_records() {
        let content = r#"
{"type":"summary","summary":"Fixing the build"}
{"type":"user","message":{"role":"user","content":"why does cargo fail?"},"timestamp":"2025-02-01T09:00:00Z","cwd":"/home/me/proj"}
{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"Check the lockfile."}]},"timestamp":"2025-02-01T09:00:10Z"}
not json at all
"#;
        let conv = parse_jsonl(content, now()).unwrap();
        assert_eq!(conv.title.as_deref(), Some("Fixing the build"));
        assert_eq!(conv.project_path.as_deref(), Some("/home/me/proj"));
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.source_format, "jsonl");
        assert_eq!(
            conv.started_at,
            Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
        );
        // The garbage line is counted.
        assert_eq!(conv.skipped_entries, 1);
    }

    #[test]
    fn test_parse_jsonl_bare_records() {
        let content = r#"
{"role":"user","content":"hello","timestamp":"2025-02-01T09:00:00Z"}
{"role":"assistant","content":"hi","timestamp":"2025-02-01T09:00:05Z"}
"#;
        let conv = parse_jsonl(content, now()).unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].role, "assistant");
    }

    #[test]
    fn test_parse_jsonl_no_messages_is_error() {
        assert!(parse_jsonl("{\"type\":\"progress\"}\n", now()).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2025-01-15T10:00:00.123Z").is_some());
        assert!(parse_timestamp("2025-01-15T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-01-15T10:00:00").is_some());
        assert!(parse_timestamp("2025-01-15 10:00:00").is_some());
        assert!(parse_timestamp("2025/01/15 10:00:00").is_some());
        assert!(parse_timestamp("1736935200").is_some());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_parse_timestamp_millis() {
        let value = serde_json::json!(1736935200000i64);
        let dt = parse_timestamp_value(&value).unwrap();
        assert_eq!(dt.timestamp(), 1736935200);
    }

    #[test]
    fn test_extract_file_references() {
        let content =
            "Edit /home/me/app/main.py and ./src/lib.rs, then check config.toml for typos.";
        let refs = extract_file_references(content);
        assert!(refs.iter().any(|r| r.contains("main.py")));
        assert!(refs.iter().any(|r| r.contains("lib.rs")));
        assert!(refs.iter().any(|r| r == "config.toml"));
    }

    #[test]
    fn test_extract_file_references_dedup() {
        let refs = extract_file_references("see a.py and a.py and a.py");
        assert_eq!(refs.iter().filter(|r| r.contains("a.py")).count(), 1);
    }

    #[test]
    fn test_token_estimate() {
        let data = serde_json::json!({
            "messages": [{"role": "user", "content": "abcdefgh"}]
        });
        let conv = parse_json(&data, now()).unwrap();
        assert_eq!(conv.messages[0].tokens_used, Some(2));
    }
}
