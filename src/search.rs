//! Keyword, semantic, and hybrid search over the archive.
//!
//! The keyword channel queries FTS5 over message content; the semantic
//! channel compares the query's feature vector against every stored
//! conversation vector. Hybrid mode min-max normalizes both channels and
//! merges them with a configurable weight. Results are always returned at
//! conversation granularity: message hits are grouped to their conversation
//! with MAX aggregation.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embed;
use crate::embedding;
use crate::models::SearchResult;

/// Filters and limits applied to a search.
#[derive(Debug, Default, Clone)]
pub struct SearchOptions {
    pub mode: String,
    pub project: Option<String>,
    pub role: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
struct ConversationCandidate {
    conversation_id: String,
    raw_score: f64,
    snippet: String,
}

/// Run a search and return ranked conversation results.
pub async fn search(
    config: &Config,
    pool: &SqlitePool,
    query: &str,
    opts: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mode = opts.mode.as_str();
    match mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            mode
        ),
    }

    if (mode == "semantic" || mode == "hybrid") && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let candidate_k = config.search.candidate_k;

    let keyword_candidates = if mode == "keyword" || mode == "hybrid" {
        fetch_keyword_candidates(pool, query, opts.role.as_deref(), candidate_k).await?
    } else {
        Vec::new()
    };

    let semantic_candidates = if mode == "semantic" || mode == "hybrid" {
        fetch_semantic_candidates(pool, config, query, candidate_k).await?
    } else {
        Vec::new()
    };

    if keyword_candidates.is_empty() && semantic_candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Normalize each channel, then merge by conversation.
    let norm_keyword = normalize_scores(&keyword_candidates);
    let norm_semantic = normalize_scores(&semantic_candidates);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.conversation_id.as_str(), *s))
        .collect();
    let sem_map: HashMap<&str, f64> = norm_semantic
        .iter()
        .map(|(c, s)| (c.conversation_id.as_str(), *s))
        .collect();

    let mut merged: HashMap<String, &ConversationCandidate> = HashMap::new();
    for c in &keyword_candidates {
        merged.entry(c.conversation_id.clone()).or_insert(c);
    }
    for c in &semantic_candidates {
        merged.entry(c.conversation_id.clone()).or_insert(c);
    }

    let effective_alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.search.hybrid_alpha,
    };

    let since_ts = parse_date_bound(opts.since.as_deref(), false)?;
    let until_ts = parse_date_bound(opts.until.as_deref(), true)?;

    let mut results = Vec::new();
    for (conversation_id, cand) in &merged {
        let k = kw_map.get(conversation_id.as_str()).copied().unwrap_or(0.0);
        let s = sem_map
            .get(conversation_id.as_str())
            .copied()
            .unwrap_or(0.0);
        let score = (1.0 - effective_alpha) * k + effective_alpha * s;

        let row = sqlx::query(
            "SELECT id, title, project_path, started_at, summary FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => continue,
        };

        let project_path: Option<String> = row.get("project_path");
        let started_at: i64 = row.get("started_at");

        if let Some(ref wanted) = opts.project {
            let matches = project_path
                .as_deref()
                .map(|p| p.contains(wanted.as_str()))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }
        if let Some(since) = since_ts {
            if started_at < since {
                continue;
            }
        }
        if let Some(until) = until_ts {
            if started_at > until {
                continue;
            }
        }

        results.push(SearchResult {
            id: row.get("id"),
            title: row.get("title"),
            project_path,
            started_at,
            score,
            snippet: cand.snippet.clone(),
        });
    }

    // Sort: score desc, started_at desc, id asc (deterministic)
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.started_at.cmp(&a.started_at))
            .then(a.id.cmp(&b.id))
    });

    let final_limit = opts.limit.unwrap_or(config.search.final_limit);
    results.truncate(final_limit as usize);

    Ok(results)
}

/// CLI entry point for `atlas search`.
pub async fn run_search(config: &Config, query: &str, opts: &SearchOptions) -> Result<()> {
    let pool = db::connect(config).await?;
    let results = search(config, &pool, query, opts).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        let date = chrono::DateTime::from_timestamp(result.started_at, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        println!("{}. [{:.2}] {}", i + 1, result.score, title_display);
        println!("    started: {}", date);
        if let Some(ref project) = result.project_path {
            println!("    project: {}", project);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

// ============ Keyword channel ============

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    role: Option<&str>,
    candidate_k: i64,
) -> Result<Vec<ConversationCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT messages_fts.conversation_id AS conversation_id, rank,
               snippet(messages_fts, 2, '>>>', '<<<', '...', 24) AS snip
        FROM messages_fts
        JOIN messages m ON m.id = messages_fts.message_id
        WHERE messages_fts MATCH ? AND (? IS NULL OR m.role = ?)
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(role)
    .bind(role)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    // Group message hits to conversations, keeping the best-ranked snippet.
    let mut best: HashMap<String, ConversationCandidate> = HashMap::new();
    for row in &rows {
        let rank: f64 = row.get("rank");
        let score = -rank; // negate so higher = better
        let conversation_id: String = row.get("conversation_id");

        match best.get_mut(&conversation_id) {
            Some(existing) if existing.raw_score >= score => {}
            Some(existing) => {
                existing.raw_score = score;
                existing.snippet = row.get("snip");
            }
            None => {
                best.insert(
                    conversation_id.clone(),
                    ConversationCandidate {
                        conversation_id,
                        raw_score: score,
                        snippet: row.get("snip"),
                    },
                );
            }
        }
    }

    Ok(best.into_values().collect())
}

// ============ Semantic channel ============

async fn fetch_semantic_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ConversationCandidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let vectors = embed::load_vectors(pool, provider.model_name()).await?;

    let mut candidates: Vec<ConversationCandidate> = Vec::with_capacity(vectors.len());
    for (conversation_id, vec) in &vectors {
        let similarity = embedding::cosine_similarity(&query_vec, vec) as f64;

        let summary: Option<String> =
            sqlx::query_scalar("SELECT summary FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(pool)
                .await?
                .flatten();

        candidates.push(ConversationCandidate {
            conversation_id: conversation_id.clone(),
            raw_score: similarity,
            snippet: summary
                .map(|s| s.chars().take(240).collect())
                .unwrap_or_default(),
        });
    }

    // Sort by similarity desc and take top K
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(candidate_k as usize);

    Ok(candidates)
}

// ============ Score normalization ============

/// Min-max normalize raw channel scores to [0, 1].
fn normalize_scores(candidates: &[ConversationCandidate]) -> Vec<(&ConversationCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

pub(crate) fn parse_date_bound(date: Option<&str>, end_of_day: bool) -> Result<Option<i64>> {
    let date = match date {
        Some(d) => d,
        None => return Ok(None),
    };
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")?;
    let (h, m, s) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
    Ok(parsed.and_hms_opt(h, m, s).map(|dt| dt.and_utc().timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(id: &str, score: f64) -> ConversationCandidate {
        ConversationCandidate {
            conversation_id: id.to_string(),
            raw_score: score,
            snippet: String::new(),
        }
    }

    #[test]
    fn test_normalize_empty() {
        let result = normalize_scores(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![make_candidate("c1", 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![make_candidate("c1", 3.0), make_candidate("c2", 3.0)];
        let result = normalize_scores(&candidates);
        for (_, score) in &result {
            assert!((*score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        let result = normalize_scores(&candidates);
        for (_, score) in &result {
            assert!(
                *score >= 0.0 && *score <= 1.0,
                "Score out of range: {}",
                score
            );
        }
    }

    #[test]
    fn test_parse_date_bounds() {
        let start = parse_date_bound(Some("2025-03-01"), false).unwrap().unwrap();
        let end = parse_date_bound(Some("2025-03-01"), true).unwrap().unwrap();
        assert_eq!(end - start, 86399);
        assert!(parse_date_bound(None, false).unwrap().is_none());
        assert!(parse_date_bound(Some("bad"), false).is_err());
    }
}
