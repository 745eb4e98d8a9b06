//! # Hybrid Retrieval CLI (`hrag`)
//!
//! Operator interface for the hybrid retrieval engine: initialize storage,
//! ingest documents, inspect evidence, and chat.
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the graph database and index directory |
//! | `hrag ingest [PATH]` | Chunk, embed, and extract a directory of text files |
//! | `hrag search "<query>"` | Show vector and graph evidence for a query |
//! | `hrag chat ["<query>"]` | Answer one question, or start an interactive session |
//! | `hrag info` | Print system info as JSON |
//! | `hrag stats` | Index and graph statistics |
//! | `hrag graph lookup <term>` | Substring lookup in the knowledge graph |
//! | `hrag graph clear` | Wipe the knowledge graph |
//!
//! Logs go to stderr; set `RUST_LOG=debug` for more detail.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use hybrid_retrieval::engine::Engine;
use hybrid_retrieval::ingest::{self, IngestOptions};
use hybrid_retrieval::{config, migrate, search, stats};

/// Hybrid Retrieval CLI: vector search plus knowledge graph lookups,
/// fused into one answer.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Hybrid Retrieval: vector search and knowledge graph lookups fused into one answer",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the graph database schema and the index directory.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a directory of text files.
    ///
    /// Chunks and embeds every matching file into the vector index and
    /// merges extracted entities and triples into the graph.
    Ingest {
        /// Directory to ingest. Defaults to `[ingest] root` from config.
        path: Option<PathBuf>,

        /// Discard the existing vector index and embed from scratch.
        #[arg(long)]
        rebuild: bool,

        /// Wipe the knowledge graph before importing.
        #[arg(long)]
        clear_graph: bool,

        /// Print the ingest report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the evidence retrieved for a query.
    Search {
        query: String,

        /// Number of vector hits. Defaults to `retrieval.top_k`.
        #[arg(long)]
        k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Ask a question. Without a query, reads questions from stdin.
    Chat {
        query: Option<String>,

        /// Conversation id; history is kept per user for this process.
        #[arg(long, default_value = "default")]
        user: String,
    },

    /// Print system info as JSON.
    Info,

    /// Show index and graph statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Inspect or reset the knowledge graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Case-insensitive substring lookup over nodes and edges.
    Lookup {
        term: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },
    /// Delete every node and edge.
    Clear,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        std::fs::create_dir_all(&cfg.index.dir).with_context(|| {
            format!("Failed to create index dir {}", cfg.index.dir.display())
        })?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let engine = Engine::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Ingest {
            path,
            rebuild,
            clear_graph,
            json,
        } => {
            let root = match path.or_else(|| engine.config().ingest.root.clone()) {
                Some(root) => root,
                None => bail!("No ingest path given and [ingest] root is not set"),
            };
            let docs = ingest::load_directory(&root, &engine.config().ingest)?;
            let report = engine
                .ingest(
                    docs,
                    IngestOptions {
                        rebuild,
                        clear_graph,
                    },
                )
                .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Ingested {} documents ({} failed): {} chunks, {} new vectors, {} total",
                    report.documents,
                    report.documents_failed,
                    report.chunks,
                    report.index.added,
                    report.vector_count
                );
                println!(
                    "Graph: {} entities, {} triples, {} nodes and {} edges created",
                    report.entities,
                    report.triples,
                    report.graph.nodes_created,
                    report.graph.edges_created
                );
                if let Some(e) = &report.graph_error {
                    println!("Graph import skipped: {}", e);
                }
            }
        }
        Commands::Search { query, k, json } => {
            search::run_search(&engine, &query, k, json).await?;
        }
        Commands::Chat { query, user } => match query {
            Some(q) => println!("{}", engine.chat(&q, &user).await?),
            None => run_repl(&engine, &user).await?,
        },
        Commands::Info => {
            let info = engine.system_info().await;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Stats { json } => {
            stats::run_stats(&engine, json).await?;
        }
        Commands::Graph { action } => match action {
            GraphAction::Lookup { term, limit, json } => {
                let hits = engine.graph_lookup(&term, limit).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                } else if hits.is_empty() {
                    println!("No matches.");
                } else {
                    for n in &hits.entities {
                        println!("{} ({})", n.name, n.kind);
                    }
                    for e in &hits.relationships {
                        println!("{} --[{}]--> {}", e.source, e.relation, e.target);
                    }
                }
            }
            GraphAction::Clear => {
                engine.clear_graph().await?;
                println!("Graph cleared.");
            }
        },
    }

    Ok(())
}

/// Read questions line by line until EOF or `exit`.
async fn run_repl(engine: &Engine, user: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        println!("{}\n", engine.chat(line, user).await?);
    }
    Ok(())
}
