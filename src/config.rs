//! Configuration parsing and validation.
//!
//! The engine is configured from a single TOML file. Every section has
//! defaults, so a file containing only `[db]` is valid and yields an
//! offline engine: hashing embedder, no generative service.
//!
//! ```toml
//! [db]
//! path = "./data/graph.sqlite"
//!
//! [index]
//! dir = "./data/index"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [[embedding.fallbacks]]
//! provider = "hash"
//! dims = 384
//!
//! [generation]
//! provider = "gemini"
//! model = "gemini-1.5-flash"
//! ```
//!
//! See `config/hrag.example.toml` for every key.

use anyhow::{bail, Context, Result};
use hybrid_retrieval_core::chunk::ChunkerConfig;
use hybrid_retrieval_core::extract::ExtractorConfig;
use hybrid_retrieval_core::memory::MAX_CAPACITY;
use hybrid_retrieval_core::retrieve::RetrievalSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractorConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chars: default_min_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            min_chars: self.min_chars,
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_min_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Vector hits per chat query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Max graph entities and relationships per query.
    #[serde(default = "default_graph_limit")]
    pub graph_limit: usize,
    #[serde(default = "default_max_graph_terms")]
    pub max_graph_terms: usize,
    #[serde(default = "default_vector_preview_chars")]
    pub vector_preview_chars: usize,
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_history_preview_chars")]
    pub history_preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            graph_limit: default_graph_limit(),
            max_graph_terms: default_max_graph_terms(),
            vector_preview_chars: default_vector_preview_chars(),
            memory_capacity: default_memory_capacity(),
            history_turns: default_history_turns(),
            history_preview_chars: default_history_preview_chars(),
        }
    }
}

impl RetrievalConfig {
    pub fn settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            graph_limit: self.graph_limit,
            max_graph_terms: self.max_graph_terms,
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_graph_limit() -> usize {
    5
}
fn default_max_graph_terms() -> usize {
    4
}
fn default_vector_preview_chars() -> usize {
    300
}
fn default_memory_capacity() -> usize {
    MAX_CAPACITY
}
fn default_history_turns() -> usize {
    3
}
fn default_history_preview_chars() -> usize {
    200
}

/// One embedding backend: the primary or an entry of `[[embedding.fallbacks]]`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EmbeddingBackend {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `ollama` (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Tried in order when the primary backend fails its startup probe.
    #[serde(default)]
    pub fallbacks: Vec<EmbeddingBackend>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            fallbacks: Vec::new(),
        }
    }
}

impl EmbeddingConfig {
    pub fn primary(&self) -> EmbeddingBackend {
        EmbeddingBackend {
            provider: self.provider.clone(),
            model: self.model.clone(),
            dims: self.dims,
            url: self.url.clone(),
        }
    }

    /// Primary backend followed by the fallbacks, in probe order.
    pub fn candidates(&self) -> Vec<EmbeddingBackend> {
        std::iter::once(self.primary())
            .chain(self.fallbacks.iter().cloned())
            .collect()
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directory scanned by `hrag ingest` when no path is given.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Documents chunked and extracted in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}
fn default_concurrency() -> usize {
    4
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    let chunking = &config.chunking;
    if chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if chunking.overlap >= chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            chunking.overlap,
            chunking.chunk_size
        );
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.graph_limit == 0 {
        bail!("retrieval.graph_limit must be >= 1");
    }
    if retrieval.memory_capacity == 0 || retrieval.memory_capacity > MAX_CAPACITY {
        bail!(
            "retrieval.memory_capacity must be between 1 and {} (got {})",
            MAX_CAPACITY,
            retrieval.memory_capacity
        );
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    for (i, backend) in config.embedding.candidates().iter().enumerate() {
        let section = if i == 0 {
            "embedding".to_string()
        } else {
            format!("embedding.fallbacks[{}]", i - 1)
        };
        validate_embedding_backend(backend)
            .with_context(|| format!("invalid [{}] section", section))?;
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "gemini" => {}
        "ollama" => {
            if config.generation.model.is_none() {
                bail!("generation.model must be specified when provider is 'ollama'");
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, or ollama.",
            other
        ),
    }

    if config.ingest.concurrency == 0 {
        bail!("ingest.concurrency must be >= 1");
    }

    Ok(())
}

fn validate_embedding_backend(backend: &EmbeddingBackend) -> Result<()> {
    match backend.provider.as_str() {
        "hash" | "local" => {
            if backend.dims == Some(0) {
                bail!("dims must be > 0");
            }
        }
        "openai" | "ollama" => {
            if backend.dims.is_none() || backend.dims == Some(0) {
                bail!("dims must be > 0 when provider is '{}'", backend.provider);
            }
            if backend.model.is_none() {
                bail!("model must be specified when provider is '{}'", backend.provider);
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    Ok(())
}
