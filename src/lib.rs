//! # Chat Atlas
//!
//! A local-first archive for exported AI-assistant conversation logs.
//!
//! Chat Atlas imports conversation exports (JSON and JSONL session logs)
//! into a SQLite database, offers keyword and feature-vector search,
//! computes similarity links between conversations, and serves list,
//! timeline, and graph data over a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Exports    │──▶│   Importer    │──▶│  SQLite    │
//! │ JSON/JSONL  │   │ parse+embed  │   │ FTS5+vecs │
//! └─────────────┘   └──────────────┘   └────┬──────┘
//!                                           │
//!                      ┌────────────────────┼──────────┐
//!                      ▼                    ▼          ▼
//!                 ┌──────────┐       ┌──────────┐  ┌────────┐
//!                 │  Linker  │       │   CLI    │  │  HTTP  │
//!                 │  (O(n²)) │       │ (atlas)  │  │ (JSON) │
//!                 └──────────┘       └──────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlas init                        # create database
//! atlas import dir ~/exports        # import conversation logs
//! atlas link auto                   # build similarity links
//! atlas search "sqlite" --mode hybrid
//! atlas serve                       # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`formats`] | Export-format parsing heuristics |
//! | [`import`] | Import pipeline |
//! | [`embedding`] | Feature-vector embedding providers |
//! | [`embed`] | Vector maintenance (pending/rebuild) |
//! | [`linker`] | Similarity auto-linking |
//! | [`links`] | Link storage |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`conversations`] | Listing, detail, delete, similar |
//! | [`export`] | Markdown transcript export |
//! | [`timeline`] | Per-day conversation buckets |
//! | [`stats`] | Archive statistics |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod conversations;
pub mod db;
pub mod embed;
pub mod embedding;
pub mod export;
pub mod formats;
pub mod import;
pub mod linker;
pub mod links;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod stats;
pub mod timeline;
