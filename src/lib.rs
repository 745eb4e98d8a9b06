//! # Hybrid Retrieval
//!
//! Answers natural-language questions by fusing dense vector search over
//! chunked documents with lookups in a knowledge graph of extracted
//! entity/relation triples.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Documents │──▶│ Chunk + Extract   │──▶│ index.bin     │
//! │ (text)    │   │ Embed             │   │ SQLite graph  │
//! └───────────┘   └──────────────────┘   └──────┬───────┘
//!                                               │
//!                          ┌────────────────────┤
//!                          ▼                    ▼
//!                   ┌─────────────┐      ┌─────────────┐
//!                   │  Retriever  │─────▶│  Composer   │──▶ answer
//!                   │ vector+graph│      │ LLM/fallback│
//!                   └─────────────┘      └─────────────┘
//! ```
//!
//! Storage-agnostic logic lives in `hybrid-retrieval-core`; this crate
//! adds configuration, persistence, provider clients, and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! hrag init                          # create the graph database
//! hrag ingest ./docs                 # chunk, embed, extract
//! hrag search "INSAT-3D"             # raw evidence
//! hrag chat "What does INSAT-3D provide?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Graph schema |
//! | [`sqlite_graph`] | SQLite [`GraphStore`](hybrid_retrieval_core::graph::GraphStore) |
//! | [`index_files`] | Vector index persistence |
//! | [`embedding`] | Embedding provider clients and resolution |
//! | [`generation`] | Generative model clients |
//! | [`ingest`] | Directory loader and per-document preparation |
//! | [`engine`] | The [`Engine`](engine::Engine): chat, retrieve, ingest |
//! | [`search`] | `hrag search` output |
//! | [`stats`] | `hrag stats` output |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod generation;
pub mod http;
pub mod index_files;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod sqlite_graph;
pub mod stats;
