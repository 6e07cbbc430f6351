//! # Chat Atlas CLI (`atlas`)
//!
//! The `atlas` binary is the primary interface for Chat Atlas. It provides
//! commands for database initialization, conversation import, search,
//! similarity linking, markdown export, and starting the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! atlas --config ./config/atlas.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `atlas init` | Create the SQLite database and run schema migrations |
//! | `atlas import file <path>` | Import one conversation export (JSON/JSONL) |
//! | `atlas import dir <path>` | Import every export under a directory |
//! | `atlas list` | List archived conversations |
//! | `atlas show <id>` | Print a conversation with all its messages |
//! | `atlas search "<query>"` | Search the archive |
//! | `atlas link auto` | Run the similarity auto-linking pass |
//! | `atlas embed pending` | Backfill missing or stale feature vectors |
//! | `atlas export <id>` | Render a conversation as markdown |
//! | `atlas serve` | Start the JSON HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! atlas init --config ./config/atlas.toml
//!
//! # Import a directory of session logs
//! atlas import dir ~/.claude/projects/myapp --project ~/code/myapp
//!
//! # Keyword search
//! atlas search "sqlite locking" --config ./config/atlas.toml
//!
//! # Hybrid search (keyword + feature-vector similarity)
//! atlas search "deployment" --mode hybrid
//!
//! # Build similarity links across the whole archive
//! atlas link auto
//!
//! # Start the API for the browser UI
//! atlas serve --config ./config/atlas.toml
//! ```

mod config;
mod conversations;
mod db;
mod embed;
mod embedding;
mod export;
mod formats;
mod import;
mod linker;
mod links;
mod migrate;
mod models;
mod search;
mod server;
mod stats;
mod timeline;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chat Atlas — a local-first archive for exported AI-assistant
/// conversation logs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/atlas.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "atlas",
    about = "Chat Atlas — a local-first archive for exported AI-assistant conversation logs",
    version,
    long_about = "Chat Atlas imports exported AI-assistant conversation logs (JSON/JSONL) into a \
    local SQLite database, offers keyword and feature-vector search, computes similarity links \
    between conversations, and serves list, timeline, and graph data over a JSON HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/atlas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (conversations, messages, messages_fts, embeddings, links).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Import conversation exports.
    Import {
        #[command(subcommand)]
        source: ImportSource,
    },

    /// List archived conversations, most recent first.
    List {
        /// Page number (1-based).
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Page size.
        #[arg(long, default_value_t = 20)]
        size: i64,

        /// Filter by project path substring.
        #[arg(long)]
        project: Option<String>,

        /// Filter by tag.
        #[arg(long)]
        tag: Option<String>,

        /// Filter by title/summary substring.
        #[arg(long)]
        query: Option<String>,
    },

    /// Print a conversation with all its messages.
    Show {
        /// Conversation UUID.
        id: String,
    },

    /// Search the archive.
    ///
    /// Queries the SQLite database using the specified search mode and
    /// returns ranked conversations with scores and snippets.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (feature vectors), or
        /// `hybrid` (weighted merge).
        #[arg(long, default_value = "keyword")]
        mode: String,

        /// Filter results to a project path substring.
        #[arg(long)]
        project: Option<String>,

        /// Restrict the keyword channel to one message role.
        #[arg(long)]
        role: Option<String>,

        /// Only return conversations started on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only return conversations started on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Manage links between conversations.
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Manage conversation feature vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Render a conversation as a markdown transcript.
    Export {
        /// Conversation UUID.
        id: String,

        /// Output file path. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show per-day conversation counts.
    Timeline,

    /// Show archive statistics.
    Stats,

    /// Start the JSON HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// list, search, links, graph, and timeline endpoints.
    Serve,
}

/// Import subcommands.
#[derive(Subcommand)]
enum ImportSource {
    /// Import a single export file (`.json` or `.jsonl`).
    File {
        /// Path to the export file.
        path: PathBuf,

        /// Project path to record on the conversation.
        #[arg(long)]
        project: Option<String>,
    },
    /// Import every matching export file under a directory.
    ///
    /// Files are matched against `import.include_globs` from the config
    /// (defaults: `**/*.json`, `**/*.jsonl`). Per-file failures are
    /// reported and skipped.
    Dir {
        /// Directory to scan.
        path: PathBuf,

        /// Project path to record on every imported conversation.
        #[arg(long)]
        project: Option<String>,
    },
}

/// Link management subcommands.
#[derive(Subcommand)]
enum LinkAction {
    /// Run the similarity auto-linking pass.
    ///
    /// Backfills feature vectors, compares every pair of conversations,
    /// creates `similar` links above the configured threshold, and links
    /// temporally adjacent conversations in the same project as
    /// `continuation`. Safe to re-run; existing links are left alone.
    Auto,
    /// Create a manual link between two conversations.
    Add {
        /// Source conversation UUID.
        from: String,
        /// Target conversation UUID.
        to: String,
        /// Link kind (defaults to `manual`).
        #[arg(long)]
        kind: Option<String>,
        /// Free-text reason stored on the link.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove a link between two conversations.
    Rm {
        /// Source conversation UUID.
        from: String,
        /// Target conversation UUID.
        to: String,
        /// Only remove this kind; all kinds when omitted.
        #[arg(long)]
        kind: Option<String>,
    },
    /// List all links for a conversation.
    List {
        /// Conversation UUID.
        id: String,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed conversations with missing or stale vectors.
    Pending {
        /// Maximum number of conversations to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all vectors.
    ///
    /// Useful after changing the embedding provider or feature layout.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { source } => match source {
            ImportSource::File { path, project } => {
                import::run_import_file(&cfg, &path, project).await?;
            }
            ImportSource::Dir { path, project } => {
                import::run_import_dir(&cfg, &path, project).await?;
            }
        },
        Commands::List {
            page,
            size,
            project,
            tag,
            query,
        } => {
            let opts = conversations::ListOptions {
                page,
                size,
                project,
                tag,
                query,
            };
            conversations::run_list(&cfg, &opts).await?;
        }
        Commands::Show { id } => {
            conversations::run_show(&cfg, &id).await?;
        }
        Commands::Search {
            query,
            mode,
            project,
            role,
            since,
            until,
            limit,
        } => {
            let opts = search::SearchOptions {
                mode,
                project,
                role,
                since,
                until,
                limit,
            };
            search::run_search(&cfg, &query, &opts).await?;
        }
        Commands::Link { action } => match action {
            LinkAction::Auto => {
                linker::run_auto_link(&cfg).await?;
            }
            LinkAction::Add {
                from,
                to,
                kind,
                reason,
            } => {
                links::run_link_add(&cfg, &from, &to, kind, reason).await?;
            }
            LinkAction::Rm { from, to, kind } => {
                links::run_link_rm(&cfg, &from, &to, kind).await?;
            }
            LinkAction::List { id } => {
                links::run_link_list(&cfg, &id).await?;
            }
        },
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed::run_embed_pending(&cfg, limit, dry_run).await?;
            }
            EmbedAction::Rebuild => {
                embed::run_embed_rebuild(&cfg).await?;
            }
        },
        Commands::Export { id, output } => {
            export::run_export(&cfg, &id, output.as_deref()).await?;
        }
        Commands::Timeline => {
            timeline::run_timeline(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
