//! JSON HTTP API.
//!
//! Exposes the archive over HTTP for the browser UI and scripts: listing,
//! detail, search, similarity, links, import, graph and timeline data,
//! stats, and markdown export.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Status, version, database reachability |
//! | `GET`    | `/api/v1/conversations` | Paginated list with filters |
//! | `GET`    | `/api/v1/conversations/{id}` | Detail with messages |
//! | `DELETE` | `/api/v1/conversations/{id}` | Cascade delete |
//! | `GET`    | `/api/v1/conversations/{id}/messages` | Messages, role filter |
//! | `GET`    | `/api/v1/conversations/{id}/similar` | Similarity ranking |
//! | `GET`    | `/api/v1/conversations/{id}/links` | Incoming + outgoing links |
//! | `GET`    | `/api/v1/conversations/{id}/export` | Markdown transcript |
//! | `GET`    | `/api/v1/search` | Keyword / semantic / hybrid search |
//! | `POST`   | `/api/v1/links` | Create a manual link |
//! | `DELETE` | `/api/v1/links` | Remove a link (both directions) |
//! | `POST`   | `/api/v1/links/auto` | Run the auto-linking pass |
//! | `POST`   | `/api/v1/import/file` | Import a server-side export file |
//! | `GET`    | `/api/v1/graph` | Nodes + deduplicated edges |
//! | `GET`    | `/api/v1/timeline` | Per-day conversation buckets |
//! | `GET`    | `/api/v1/stats` | Archive totals |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser UI can be
//! served from anywhere.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::conversations::{self, ListOptions};
use crate::db;
use crate::export;
use crate::import;
use crate::linker;
use crate::links;
use crate::models::LINK_KIND_MANUAL;
use crate::search::{self, SearchOptions};
use crate::stats;
use crate::timeline;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Starts the HTTP server.
///
/// Binds to the address configured in `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/v1/conversations", get(handle_list))
        .route(
            "/api/v1/conversations/{id}",
            get(handle_detail).delete(handle_delete),
        )
        .route("/api/v1/conversations/{id}/messages", get(handle_messages))
        .route("/api/v1/conversations/{id}/similar", get(handle_similar))
        .route("/api/v1/conversations/{id}/links", get(handle_conv_links))
        .route("/api/v1/conversations/{id}/export", get(handle_export))
        .route("/api/v1/search", get(handle_search))
        .route(
            "/api/v1/links",
            post(handle_create_link).delete(handle_delete_link),
        )
        .route("/api/v1/links/auto", post(handle_auto_link))
        .route("/api/v1/import/file", post(handle_import_file))
        .route("/api/v1/graph", get(handle_graph))
        .route("/api/v1/timeline", get(handle_timeline))
        .route("/api/v1/stats", get(handle_stats))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "server listening");
    println!("Chat Atlas API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Map errors bubbling out of the data layer onto status codes; "not found"
/// and validation wording become client errors instead of 500s.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("Unknown search mode")
        || msg.contains("requires embeddings")
        || msg.contains("must not be empty")
        || msg.contains("no stored vector")
        || msg.contains("Invalid")
        || msg.contains("Failed to parse")
    {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "database health check failed");
            "unhealthy".to_string()
        }
    };

    let status = if database == "healthy" { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
    })
}

// ============ GET /api/v1/conversations ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_size")]
    size: i64,
    project: Option<String>,
    tag: Option<String>,
    q: Option<String>,
}

fn default_page() -> i64 {
    1
}
fn default_size() -> i64 {
    20
}

async fn handle_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<conversations::ConversationPage>, AppError> {
    let opts = ListOptions {
        page: params.page,
        size: params.size,
        project: params.project,
        tag: params.tag,
        query: params.q,
    };

    let page = conversations::list_conversations(&state.pool, &opts)
        .await
        .map_err(classify_error)?;

    Ok(Json(page))
}

// ============ GET /api/v1/conversations/{id} ============

#[derive(Serialize)]
struct DetailResponse {
    #[serde(flatten)]
    conversation: crate::models::Conversation,
    messages: Vec<crate::models::Message>,
}

async fn handle_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DetailResponse>, AppError> {
    let conversation = conversations::get_conversation(&state.pool, &id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("conversation not found: {}", id)))?;

    let messages = conversations::get_messages(&state.pool, &id, None, i64::MAX, 0)
        .await
        .map_err(classify_error)?;

    Ok(Json(DetailResponse {
        conversation,
        messages,
    }))
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = conversations::delete_conversation(&state.pool, &id)
        .await
        .map_err(classify_error)?;

    if !deleted {
        return Err(not_found(format!("conversation not found: {}", id)));
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

// ============ GET /api/v1/conversations/{id}/messages ============

#[derive(Deserialize)]
struct MessagesParams {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_msg_size")]
    size: i64,
    role: Option<String>,
}

fn default_msg_size() -> i64 {
    50
}

async fn handle_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<crate::models::Message>>, AppError> {
    if !links::conversation_exists(&state.pool, &id)
        .await
        .map_err(classify_error)?
    {
        return Err(not_found(format!("conversation not found: {}", id)));
    }

    if let Some(ref role) = params.role {
        if !matches!(role.as_str(), "user" | "assistant" | "system" | "unknown") {
            return Err(bad_request(format!("invalid role filter: {}", role)));
        }
    }

    let page = params.page.max(1);
    let size = params.size.clamp(1, 200);
    let messages = conversations::get_messages(
        &state.pool,
        &id,
        params.role.as_deref(),
        size,
        (page - 1) * size,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(messages))
}

// ============ GET /api/v1/conversations/{id}/similar ============

#[derive(Deserialize)]
struct SimilarParams {
    #[serde(default = "default_similar_limit")]
    limit: usize,
    threshold: Option<f64>,
}

fn default_similar_limit() -> usize {
    5
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<Vec<crate::models::SearchResult>>, AppError> {
    if !links::conversation_exists(&state.pool, &id)
        .await
        .map_err(classify_error)?
    {
        return Err(not_found(format!("conversation not found: {}", id)));
    }

    let threshold = params
        .threshold
        .unwrap_or(state.config.linking.similarity_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(bad_request("threshold must be in [0.0, 1.0]"));
    }

    let similar =
        conversations::find_similar(&state.config, &state.pool, &id, params.limit, threshold)
            .await
            .map_err(classify_error)?;

    Ok(Json(similar))
}

// ============ GET /api/v1/conversations/{id}/links ============

async fn handle_conv_links(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<crate::models::Link>>, AppError> {
    if !links::conversation_exists(&state.pool, &id)
        .await
        .map_err(classify_error)?
    {
        return Err(not_found(format!("conversation not found: {}", id)));
    }

    let result = links::links_for(&state.pool, &id)
        .await
        .map_err(classify_error)?;

    Ok(Json(result))
}

// ============ GET /api/v1/conversations/{id}/export ============

async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let markdown = export::render_markdown(&state.pool, &id)
        .await
        .map_err(classify_error)?;

    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}

// ============ GET /api/v1/search ============

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    #[serde(default = "default_mode")]
    mode: String,
    project: Option<String>,
    role: Option<String>,
    since: Option<String>,
    until: Option<String>,
    limit: Option<i64>,
}

fn default_mode() -> String {
    "keyword".to_string()
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<crate::models::SearchResult>,
    total: usize,
    mode: String,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let opts = SearchOptions {
        mode: params.mode.clone(),
        project: params.project,
        role: params.role,
        since: params.since,
        until: params.until,
        limit: params.limit,
    };

    let results = search::search(&state.config, &state.pool, &params.q, &opts)
        .await
        .map_err(classify_error)?;

    Ok(Json(SearchResponse {
        total: results.len(),
        mode: params.mode,
        results,
    }))
}

// ============ POST /api/v1/links ============

#[derive(Deserialize)]
struct CreateLinkRequest {
    from_id: String,
    to_id: String,
    kind: Option<String>,
    reason: Option<String>,
}

async fn handle_create_link(
    State(state): State<AppState>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.from_id == req.to_id {
        return Err(bad_request("cannot link a conversation to itself"));
    }

    for id in [&req.from_id, &req.to_id] {
        if !links::conversation_exists(&state.pool, id)
            .await
            .map_err(classify_error)?
        {
            return Err(not_found(format!("conversation not found: {}", id)));
        }
    }

    let kind = req.kind.as_deref().unwrap_or(LINK_KIND_MANUAL);
    let inserted = links::create_mirror(
        &state.pool,
        &req.from_id,
        &req.to_id,
        kind,
        None,
        req.reason.as_deref(),
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "created": inserted > 0,
    })))
}

// ============ DELETE /api/v1/links ============

#[derive(Deserialize)]
struct DeleteLinkRequest {
    from_id: String,
    to_id: String,
    kind: Option<String>,
}

async fn handle_delete_link(
    State(state): State<AppState>,
    Json(req): Json<DeleteLinkRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = links::delete_mirror(
        &state.pool,
        &req.from_id,
        &req.to_id,
        req.kind.as_deref(),
    )
    .await
    .map_err(classify_error)?;

    if removed == 0 {
        return Err(not_found("no such link".to_string()));
    }

    Ok(Json(serde_json::json!({ "success": true, "removed": removed })))
}

// ============ POST /api/v1/links/auto ============

async fn handle_auto_link(
    State(state): State<AppState>,
) -> Result<Json<linker::LinkReport>, AppError> {
    let report = linker::auto_link(&state.config, &state.pool)
        .await
        .map_err(classify_error)?;

    Ok(Json(report))
}

// ============ POST /api/v1/import/file ============

#[derive(Deserialize)]
struct ImportFileRequest {
    path: String,
    project_path: Option<String>,
}

async fn handle_import_file(
    State(state): State<AppState>,
    Json(req): Json<ImportFileRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = import::import_file(
        &state.config,
        &state.pool,
        std::path::Path::new(&req.path),
        req.project_path.as_deref(),
    )
    .await
    .map_err(classify_error)?;

    let body = match outcome {
        import::ImportOutcome::Imported {
            conversation_id,
            total_messages,
            skipped_entries,
        } => serde_json::json!({
            "success": true,
            "status": "imported",
            "conversation_id": conversation_id,
            "total_messages": total_messages,
            "skipped_entries": skipped_entries,
        }),
        import::ImportOutcome::AlreadyExists { conversation_id } => serde_json::json!({
            "success": true,
            "status": "already_exists",
            "conversation_id": conversation_id,
        }),
    };

    Ok(Json(body))
}

// ============ GET /api/v1/graph ============

#[derive(Serialize)]
struct GraphResponse {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

#[derive(Serialize)]
struct GraphNode {
    id: String,
    title: Option<String>,
    project_path: Option<String>,
    total_messages: i64,
}

#[derive(Serialize)]
struct GraphEdge {
    source: String,
    target: String,
    kind: String,
    score: Option<f64>,
}

async fn handle_graph(State(state): State<AppState>) -> Result<Json<GraphResponse>, AppError> {
    let node_rows = sqlx::query(
        "SELECT id, title, project_path, total_messages FROM conversations ORDER BY started_at DESC",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(|e| internal(e.to_string()))?;

    let nodes = node_rows
        .iter()
        .map(|row| GraphNode {
            id: row.get("id"),
            title: row.get("title"),
            project_path: row.get("project_path"),
            total_messages: row.get("total_messages"),
        })
        .collect();

    // Mirror rows collapse to one undirected edge each.
    let all = links::all_links(&state.pool)
        .await
        .map_err(classify_error)?;
    let edges = all
        .into_iter()
        .filter(|l| l.from_id < l.to_id)
        .map(|l| GraphEdge {
            source: l.from_id,
            target: l.to_id,
            kind: l.kind,
            score: l.score,
        })
        .collect();

    Ok(Json(GraphResponse { nodes, edges }))
}

// ============ GET /api/v1/timeline ============

#[derive(Deserialize)]
struct TimelineParams {
    since: Option<String>,
    until: Option<String>,
}

async fn handle_timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<Vec<timeline::TimelineDay>>, AppError> {
    let since = search::parse_date_bound(params.since.as_deref(), false)
        .map_err(|e| bad_request(e.to_string()))?;
    let until = search::parse_date_bound(params.until.as_deref(), true)
        .map_err(|e| bad_request(e.to_string()))?;

    let days = timeline::timeline(&state.pool, since, until)
        .await
        .map_err(classify_error)?;

    Ok(Json(days))
}

// ============ GET /api/v1/stats ============

async fn handle_stats(
    State(state): State<AppState>,
) -> Result<Json<stats::ArchiveStats>, AppError> {
    let result = stats::collect_stats(&state.config, &state.pool)
        .await
        .map_err(classify_error)?;

    Ok(Json(result))
}
