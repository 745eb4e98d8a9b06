//! The retrieval engine.
//!
//! An [`Engine`] is constructed explicitly from a [`Config`] and owns every
//! long-lived handle: the bound embedding provider, the published vector
//! index, the graph store, the generative client, and conversation memory.
//! Several engines can coexist in one process.
//!
//! # Concurrency
//!
//! The vector index is published as an [`IndexState`] behind a
//! `parking_lot::RwLock`. Queriers clone the inner `Arc` and release the
//! lock before searching; [`Engine::ingest`] builds the next index off to
//! the side under a single-writer mutex, persists it, then swaps it in.
//!
//! # Degradation
//!
//! [`Engine::chat`] only fails for invalid input. A failing embedding
//! backend, graph, or generative service reduces the evidence and the
//! answer falls back to [`compose_fallback`].
//!
//! Ingestion is stricter about embeddings. With no embedding backend
//! answering it refuses to run, and with a fallback bound it will not
//! replace a saved index built by another model unless asked to rebuild.

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use hybrid_retrieval_core::chunk::Chunker;
use hybrid_retrieval_core::compose::{
    compose, compose_fallback, format_graph_context, format_vector_context,
};
use hybrid_retrieval_core::embedding::EmbeddingProvider;
use hybrid_retrieval_core::error::{RetrievalError, RetrievalResult};
use hybrid_retrieval_core::extract::Extractor;
use hybrid_retrieval_core::graph::GraphStore;
use hybrid_retrieval_core::memory::ConversationMemory;
use hybrid_retrieval_core::models::{
    Chunk, ConversationTurn, Document, GraphHits, GraphStatistics, SourceStatus,
};
use hybrid_retrieval_core::retrieve::{HybridContext, HybridRetriever};
use hybrid_retrieval_core::vector::{IndexReport, IndexState, VectorIndex};

use crate::config::Config;
use crate::embedding::ProviderBinding;
use crate::generation::{resolve_generator, GenerativeService};
use crate::ingest::{prepare_documents, IngestOptions, IngestReport, PreparedDocument};
use crate::sqlite_graph::SqliteGraphStore;
use crate::{db, embedding, index_files, migrate};

/// User id substituted for an empty one.
pub const DEFAULT_USER: &str = "default";

/// Serializable health summary for the chat front end.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub chunk_count: usize,
    pub vector_dimension: usize,
    pub embedding_model: String,
    pub embedding_binding: ProviderBinding,
    pub index_status: SourceStatus,
    pub graph_connected: bool,
    pub graph_status: SourceStatus,
    pub generative_service_available: bool,
    pub generative_service: Option<String>,
}

pub struct Engine {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    binding: ProviderBinding,
    chunker: Arc<Chunker>,
    extractor: Arc<Extractor>,
    index: RwLock<IndexState>,
    graph: Option<Arc<dyn GraphStore>>,
    generator: Option<Arc<dyn GenerativeService>>,
    memory: ConversationMemory,
    retriever: HybridRetriever,
    write_lock: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Resolve every collaborator from configuration.
    ///
    /// Only an embedding primary that cannot be constructed at all is
    /// fatal. Unreachable embedding backends, graph database, or generative
    /// service leave the engine running degraded.
    pub async fn open(config: Config) -> Result<Self> {
        let resolved = embedding::resolve_provider(&config.embedding).await?;

        let graph: Option<Arc<dyn GraphStore>> = match open_graph(&config).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "graph store unavailable, continuing without it");
                None
            }
        };

        let generator = resolve_generator(&config.generation).await;
        Ok(Self::new(config, resolved.provider, graph, generator)?.with_binding(resolved.binding))
    }

    /// Assemble an engine from already-bound collaborators. The provider
    /// is treated as the configured primary; see [`Engine::with_binding`].
    pub fn new(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        graph: Option<Arc<dyn GraphStore>>,
        generator: Option<Arc<dyn GenerativeService>>,
    ) -> Result<Self> {
        let chunker = Arc::new(Chunker::new(config.chunking.chunker_config())?);
        let extractor = Arc::new(
            Extractor::new(&config.extraction).context("Failed to build entity extractor")?,
        );

        let state = index_files::open_state(&config.index.dir, provider.as_ref());
        match &state {
            IndexState::Ready(index) => info!(vectors = index.len(), "vector index ready"),
            IndexState::Unavailable(reason) => {
                warn!(reason = %reason, "vector index unavailable, run `hrag ingest` to rebuild")
            }
        }

        let retriever = HybridRetriever::new(
            Arc::clone(&provider),
            graph.clone(),
            Arc::clone(&extractor),
            config.retrieval.settings(),
        );
        let memory = ConversationMemory::with_limits(
            config.retrieval.memory_capacity,
            config.retrieval.history_turns,
            config.retrieval.history_preview_chars,
        );

        Ok(Self {
            config,
            provider,
            binding: ProviderBinding::Primary,
            chunker,
            extractor,
            index: RwLock::new(state),
            graph,
            generator,
            memory,
            retriever,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Record how the provider was bound. An unverified provider takes
    /// the vector index out of service.
    pub fn with_binding(mut self, binding: ProviderBinding) -> Self {
        if let ProviderBinding::Unverified { reason } = &binding {
            warn!(reason = %reason, "embedding provider unreachable, vector search disabled");
            *self.index.get_mut() =
                IndexState::Unavailable(format!("embedding provider unreachable: {}", reason));
        }
        self.binding = binding;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn binding(&self) -> &ProviderBinding {
        &self.binding
    }

    pub fn graph(&self) -> Option<&Arc<dyn GraphStore>> {
        self.graph.as_ref()
    }

    /// Snapshot of the published index. Cheap: clones an `Arc`.
    pub fn index_state(&self) -> IndexState {
        self.index.read().clone()
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn history(&self, user_id: &str) -> Vec<ConversationTurn> {
        self.memory.history(normalize_user(user_id))
    }

    /// Answer `query` for `user_id`. Always returns an answer unless the
    /// query itself is empty.
    pub async fn chat(&self, query: &str, user_id: &str) -> RetrievalResult<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "query must not be empty".to_string(),
            ));
        }
        let user_id = normalize_user(user_id);
        let span = info_span!("chat", request_id = %Uuid::new_v4(), user_id = %user_id);
        Ok(self.answer(query, user_id).instrument(span).await)
    }

    async fn answer(&self, query: &str, user_id: &str) -> String {
        let ctx = self.retrieve(query, self.config.retrieval.top_k).await;
        let vector_context =
            format_vector_context(&ctx.vector_hits, self.config.retrieval.vector_preview_chars);
        let graph_context = format_graph_context(&ctx.graph_hits);

        let answer = match &self.generator {
            Some(generator) => {
                let history = self.memory.render_history(user_id);
                let prompt = compose(query, &vector_context, &graph_context, &history);
                match generator.generate(&prompt).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(service = %generator.name(), error = %e, "generation failed, using fallback answer");
                        compose_fallback(query, &vector_context, &graph_context)
                    }
                }
            }
            None => compose_fallback(query, &vector_context, &graph_context),
        };

        self.memory.append(user_id, query, &answer);
        info!(
            vector_hits = ctx.vector_hits.len(),
            entities = ctx.graph_hits.entities.len(),
            relationships = ctx.graph_hits.relationships.len(),
            "chat answered"
        );
        answer
    }

    /// Gather vector and graph evidence for `query`.
    pub async fn retrieve(&self, query: &str, k: usize) -> HybridContext {
        let state = self.index_state();
        self.retriever.retrieve(&state, query, k).await
    }

    /// Direct graph lookup, bypassing vector search.
    pub async fn graph_lookup(&self, term: &str, limit: usize) -> RetrievalResult<GraphHits> {
        let graph = self.require_graph()?;
        let (entities, relationships) = futures::try_join!(
            graph.lookup_entities(term, limit),
            graph.lookup_relationships(term, limit)
        )?;
        Ok(GraphHits {
            entities,
            relationships,
        })
    }

    pub async fn graph_statistics(&self) -> RetrievalResult<GraphStatistics> {
        self.require_graph()?.statistics().await
    }

    pub async fn clear_graph(&self) -> RetrievalResult<()> {
        let _guard = self.write_lock.lock().await;
        self.require_graph()?.clear().await?;
        info!("graph cleared");
        Ok(())
    }

    fn require_graph(&self) -> RetrievalResult<&Arc<dyn GraphStore>> {
        self.graph
            .as_ref()
            .ok_or_else(|| RetrievalError::GraphUnavailable("no graph store configured".to_string()))
    }

    pub async fn system_info(&self) -> SystemInfo {
        let state = self.index_state();
        let graph_status = match &self.graph {
            None => SourceStatus::Unavailable,
            Some(graph) => match graph.health().await {
                Ok(()) => SourceStatus::Available,
                Err(e) => SourceStatus::Error(e.to_string()),
            },
        };

        SystemInfo {
            chunk_count: state.len(),
            vector_dimension: self.provider.dims(),
            embedding_model: self.provider.model_name().to_string(),
            embedding_binding: self.binding.clone(),
            index_status: state.status(),
            graph_connected: graph_status.is_available(),
            graph_status,
            generative_service_available: self.generator.is_some(),
            generative_service: self.generator.as_ref().map(|g| g.name()),
        }
    }

    /// Chunk, embed, extract, and merge `docs`.
    ///
    /// Per-document failures are counted and skipped. The new index is
    /// written to disk before it is published; a failed write leaves the
    /// previous index serving. Graph import failures are reported in
    /// [`IngestReport::graph_error`] and do not undo the index update.
    ///
    /// Fails without touching anything when no embedding backend answered
    /// at startup.
    pub async fn ingest(&self, docs: Vec<Document>, options: IngestOptions) -> Result<IngestReport> {
        if let ProviderBinding::Unverified { reason } = &self.binding {
            bail!("cannot ingest, no embedding provider answered at startup ({})", reason);
        }
        let _guard = self.write_lock.lock().await;

        let mut report = IngestReport {
            documents: docs.len(),
            ..Default::default()
        };

        let (prepared, failures) = prepare_documents(
            docs,
            Arc::clone(&self.chunker),
            Arc::clone(&self.extractor),
            self.config.ingest.concurrency,
        )
        .await;
        report.documents_failed = failures.len();

        let chunks: Vec<_> = prepared.iter().flat_map(|p| p.chunks.iter().cloned()).collect();
        report.chunks = chunks.len();

        let (index, index_report) = self.next_index(&chunks, options.rebuild).await?;
        report.index = index_report;
        report.vector_count = index.len();

        index_files::save_index(&self.config.index.dir, &index)?;
        *self.index.write() = IndexState::ready(index);

        report.entities = prepared.iter().map(|p| p.extraction.entities.len()).sum();
        report.triples = prepared.iter().map(|p| p.extraction.triples.len()).sum();
        match &self.graph {
            None => report.graph_error = Some("no graph store configured".to_string()),
            Some(graph) => {
                if let Err(e) = self
                    .import_graph(graph.as_ref(), &prepared, options.clear_graph, &mut report)
                    .await
                {
                    warn!(error = %e, "graph import failed, vector index was still updated");
                    report.graph_error = Some(e.to_string());
                }
            }
        }

        info!(
            documents = report.documents,
            failed = report.documents_failed,
            chunks = report.chunks,
            added = report.index.added,
            vectors = report.vector_count,
            nodes_created = report.graph.nodes_created,
            edges_created = report.graph.edges_created,
            "ingest complete"
        );
        Ok(report)
    }

    /// The index to publish after adding `chunks`.
    ///
    /// Appends to the serving index when possible. When the serving index
    /// is unavailable (for example the embedding model changed) the chunks
    /// recorded on disk are re-embedded together with the new ones, but
    /// only by the configured primary provider.
    async fn next_index(
        &self,
        chunks: &[Chunk],
        rebuild: bool,
    ) -> Result<(VectorIndex, IndexReport)> {
        let provider = self.provider.as_ref();
        let batch_size = self.config.embedding.batch_size;

        if rebuild {
            info!(chunks = chunks.len(), "rebuilding vector index from scratch");
            return Ok(VectorIndex::build(provider, chunks, batch_size).await);
        }

        match self.index_state() {
            IndexState::Ready(current) => {
                let mut next = (*current).clone();
                let report = next.append(provider, chunks, batch_size).await?;
                Ok((next, report))
            }
            IndexState::Unavailable(reason) => {
                if let ProviderBinding::Fallback { provider } = &self.binding {
                    bail!(
                        "saved index is unusable with fallback embedding provider '{}' ({}); \
                         refusing to replace it, pass --rebuild to re-embed with the fallback",
                        provider,
                        reason
                    );
                }
                let mut all = match index_files::read_chunks(&self.config.index.dir) {
                    Ok(previous) => previous,
                    Err(e) => {
                        debug!(error = %e, "no previous chunk metadata to carry over");
                        Vec::new()
                    }
                };
                warn!(
                    reason = %reason,
                    carried_over = all.len(),
                    "serving index unusable, re-embedding previous chunks"
                );
                all.extend_from_slice(chunks);
                Ok(VectorIndex::build(provider, &all, batch_size).await)
            }
        }
    }

    async fn import_graph(
        &self,
        graph: &dyn GraphStore,
        prepared: &[PreparedDocument],
        clear_first: bool,
        report: &mut IngestReport,
    ) -> RetrievalResult<()> {
        if clear_first {
            graph.clear().await?;
            info!("graph cleared before import");
        }
        for doc in prepared {
            let triples = graph.import_triples(&doc.extraction.triples).await?;
            let entities = graph
                .import_entities(&doc.extraction.entities, &doc.source_id)
                .await?;
            report.graph.nodes_created += triples.nodes_created + entities.nodes_created;
            report.graph.edges_created += triples.edges_created + entities.edges_created;
        }
        Ok(())
    }
}

fn normalize_user(user_id: &str) -> &str {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        DEFAULT_USER
    } else {
        trimmed
    }
}

async fn open_graph(config: &Config) -> Result<SqliteGraphStore> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool)
        .await
        .context("Failed to prepare graph schema")?;
    Ok(SqliteGraphStore::new(pool))
}
