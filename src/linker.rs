//! Similarity auto-linking.
//!
//! The batch pass behind `atlas link auto` and `POST /api/v1/links/auto`:
//!
//! 1. Backfill any missing or stale feature vectors (per-conversation
//!    failures are logged and skipped, never fatal).
//! 2. Load every `(conversation, vector)` pair, ordered by id.
//! 3. Brute-force upper-triangle pass over all pairs; cosine similarity at
//!    or above the threshold creates mirror `similar` links.
//! 4. Continuation pass: conversations in the same project, ordered by
//!    start time; adjacent pairs within the window get `continuation` links.
//!
//! Link inserts are insert-or-ignore on `(from_id, to_id, kind)`, so
//! re-running the pass over unchanged data creates nothing new.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embed;
use crate::embedding;
use crate::links;
use crate::models::{LINK_KIND_CONTINUATION, LINK_KIND_SIMILAR};

/// Summary of one auto-linking run.
#[derive(Debug, Default, Serialize)]
pub struct LinkReport {
    pub conversations: usize,
    pub vectors_generated: usize,
    pub vectors_failed: usize,
    pub pairs_compared: usize,
    pub similar_created: usize,
    pub continuation_created: usize,
    pub already_linked: usize,
}

/// Run the full auto-linking pass.
pub async fn auto_link(config: &Config, pool: &SqlitePool) -> Result<LinkReport> {
    let threshold = config.linking.similarity_threshold;

    let mut report = LinkReport::default();

    let vectors = if config.embedding.is_enabled() {
        let provider = embedding::create_provider(&config.embedding)?;
        let model_name = provider.model_name().to_string();

        // Step 1: make sure every conversation has a current vector. One bad
        // conversation must not abort the batch.
        let pending = embed::find_pending(pool, &model_name, None).await?;
        for item in &pending {
            match embed::embed_conversation(config, pool, &item.conversation_id).await {
                Ok(()) => report.vectors_generated += 1,
                Err(e) => {
                    report.vectors_failed += 1;
                    tracing::warn!(
                        conversation_id = %item.conversation_id,
                        error = %e,
                        "embedding failed, conversation excluded from linking"
                    );
                }
            }
        }

        // Step 2: load all vectors.
        embed::load_vectors(pool, &model_name).await?
    } else {
        tracing::info!("embeddings disabled, skipping similarity pass");
        Vec::new()
    };
    report.conversations = vectors.len();

    // Step 3: pairwise similarity, upper triangle only. Each unordered
    // pair is compared exactly once, never against itself.
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            report.pairs_compared += 1;

            let sim = embedding::cosine_similarity(&vectors[i].1, &vectors[j].1) as f64;
            if sim < threshold {
                continue;
            }

            let inserted = links::create_mirror(
                pool,
                &vectors[i].0,
                &vectors[j].0,
                LINK_KIND_SIMILAR,
                Some(sim),
                None,
            )
            .await?;

            if inserted > 0 {
                report.similar_created += 1;
            } else {
                report.already_linked += 1;
            }
        }
    }

    // Step 4: continuation links inside each project.
    report.continuation_created = link_continuations(config, pool).await?;

    tracing::info!(
        conversations = report.conversations,
        pairs = report.pairs_compared,
        similar = report.similar_created,
        continuations = report.continuation_created,
        "auto-link pass complete"
    );

    Ok(report)
}

/// Link temporally adjacent conversations that share a project path.
async fn link_continuations(config: &Config, pool: &SqlitePool) -> Result<usize> {
    let window_secs = config.linking.continuation_window_hours * 3600;

    let rows = sqlx::query(
        r#"
        SELECT id, project_path, started_at
        FROM conversations
        WHERE project_path IS NOT NULL AND project_path != ''
        ORDER BY project_path ASC, started_at ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut created = 0usize;
    for pair in rows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);

        let prev_project: String = prev.get("project_path");
        let next_project: String = next.get("project_path");
        if prev_project != next_project {
            continue;
        }

        let gap: i64 = next.get::<i64, _>("started_at") - prev.get::<i64, _>("started_at");
        if gap > window_secs {
            continue;
        }

        let prev_id: String = prev.get("id");
        let next_id: String = next.get("id");
        let reason = format!(
            "started {} minutes apart in {}",
            gap / 60,
            prev_project
        );

        let inserted = links::create_mirror(
            pool,
            &prev_id,
            &next_id,
            LINK_KIND_CONTINUATION,
            Some(1.0),
            Some(&reason),
        )
        .await?;

        if inserted > 0 {
            created += 1;
        }
    }

    Ok(created)
}

/// CLI entry point for `atlas link auto`.
pub async fn run_auto_link(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = auto_link(config, &pool).await?;

    println!("link auto");
    println!("  conversations: {}", report.conversations);
    if report.vectors_generated > 0 || report.vectors_failed > 0 {
        println!("  vectors generated: {}", report.vectors_generated);
        println!("  vectors failed: {}", report.vectors_failed);
    }
    println!("  pairs compared: {}", report.pairs_compared);
    println!("  similar links created: {}", report.similar_created);
    println!(
        "  continuation links created: {}",
        report.continuation_created
    );
    println!("  already linked: {}", report.already_linked);
    println!("ok");

    pool.close().await;
    Ok(())
}
