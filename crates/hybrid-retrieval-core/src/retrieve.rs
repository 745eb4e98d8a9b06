//! Hybrid retrieval: vector search and graph lookup side by side.
//!
//! The two sources share no data, so they run concurrently and their
//! results are concatenated without cross-modal re-ranking. A failing
//! source contributes empty hits and reports why in its [`SourceStatus`];
//! it never fails the request.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::error::RetrievalResult;
use crate::extract::Extractor;
use crate::graph::GraphStore;
use crate::models::{GraphEdge, GraphHits, GraphNode, SourceStatus, VectorHit};
use crate::vector::IndexState;

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    /// Max results per graph lookup (entities and relationships each).
    pub graph_limit: usize,
    /// Max distinct search terms sent to the graph per query.
    pub max_graph_terms: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            graph_limit: 5,
            max_graph_terms: 4,
        }
    }
}

/// Evidence bundle for one query.
#[derive(Debug, Clone, Serialize)]
pub struct HybridContext {
    pub vector_hits: Vec<VectorHit>,
    pub graph_hits: GraphHits,
    pub vector_status: SourceStatus,
    pub graph_status: SourceStatus,
}

pub struct HybridRetriever {
    provider: Arc<dyn EmbeddingProvider>,
    graph: Option<Arc<dyn GraphStore>>,
    extractor: Arc<Extractor>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        graph: Option<Arc<dyn GraphStore>>,
        extractor: Arc<Extractor>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            provider,
            graph,
            extractor,
            settings,
        }
    }

    pub async fn retrieve(&self, index: &IndexState, query: &str, k: usize) -> HybridContext {
        let (vector, graph) = futures::join!(
            index.search(self.provider.as_ref(), query, k),
            self.graph_lookup(query)
        );

        let (vector_hits, vector_status) = match vector {
            Ok(hits) => (hits, SourceStatus::Available),
            Err(e) => {
                warn!(error = %e, "vector search degraded");
                (Vec::new(), SourceStatus::Error(e.to_string()))
            }
        };

        let (graph_hits, graph_status) = match graph {
            None => (GraphHits::default(), SourceStatus::Unavailable),
            Some(Ok(hits)) => (hits, SourceStatus::Available),
            Some(Err(e)) => {
                warn!(error = %e, "graph lookup degraded");
                (GraphHits::default(), SourceStatus::Error(e.to_string()))
            }
        };

        debug!(
            vector_hits = vector_hits.len(),
            entities = graph_hits.entities.len(),
            relationships = graph_hits.relationships.len(),
            "retrieval complete"
        );

        HybridContext {
            vector_hits,
            graph_hits,
            vector_status,
            graph_status,
        }
    }

    /// The whole query plus entity spans found in it, deduplicated.
    pub fn graph_terms(&self, query: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(query.trim().to_string())
            .chain(self.extractor.query_terms(query))
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(self.settings.max_graph_terms.max(1))
            .collect()
    }

    async fn graph_lookup(&self, query: &str) -> Option<RetrievalResult<GraphHits>> {
        let graph = self.graph.as_ref()?;
        Some(self.lookup_terms(graph.as_ref(), &self.graph_terms(query)).await)
    }

    async fn lookup_terms(
        &self,
        graph: &dyn GraphStore,
        terms: &[String],
    ) -> RetrievalResult<GraphHits> {
        let limit = self.settings.graph_limit;
        let mut entities: Vec<GraphNode> = Vec::new();
        let mut relationships: Vec<GraphEdge> = Vec::new();
        let mut seen_nodes = HashSet::new();
        let mut seen_edges = HashSet::new();

        for term in terms {
            let (found_nodes, found_edges) = futures::try_join!(
                graph.lookup_entities(term, limit),
                graph.lookup_relationships(term, limit)
            )?;
            for n in found_nodes {
                if seen_nodes.insert(n.name.clone()) {
                    entities.push(n);
                }
            }
            for e in found_edges {
                if seen_edges.insert(e.clone()) {
                    relationships.push(e);
                }
            }
        }

        entities.truncate(limit);
        relationships.truncate(limit);
        Ok(GraphHits {
            entities,
            relationships,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::RetrievalError;
    use crate::extract::ExtractorConfig;
    use crate::graph::memory::InMemoryGraphStore;
    use crate::graph::ImportSummary;
    use crate::models::{Chunk, Entity, GraphStatistics, Relation, Triple};
    use crate::vector::VectorIndex;
    use async_trait::async_trait;

    struct DownGraph;

    #[async_trait]
    impl GraphStore for DownGraph {
        async fn import_triples(&self, _: &[Triple]) -> RetrievalResult<ImportSummary> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn import_entities(&self, _: &[Entity], _: &str) -> RetrievalResult<ImportSummary> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn lookup_entities(&self, _: &str, _: usize) -> RetrievalResult<Vec<GraphNode>> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn lookup_relationships(&self, _: &str, _: usize) -> RetrievalResult<Vec<GraphEdge>> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn statistics(&self) -> RetrievalResult<GraphStatistics> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn clear(&self) -> RetrievalResult<()> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
        async fn health(&self) -> RetrievalResult<()> {
            Err(RetrievalError::GraphUnavailable("connection refused".into()))
        }
    }

    fn retriever(graph: Option<Arc<dyn GraphStore>>) -> HybridRetriever {
        HybridRetriever::new(
            Arc::new(HashEmbedder::new(64)),
            graph,
            Arc::new(Extractor::new(&ExtractorConfig::default()).unwrap()),
            RetrievalSettings::default(),
        )
    }

    async fn populated_graph() -> Arc<dyn GraphStore> {
        let store = InMemoryGraphStore::new();
        store
            .import_triples(&[Triple::new(
                "INSAT-3D",
                Relation::Provides,
                "Sea Surface Temperature",
                "doc",
            )])
            .await
            .unwrap();
        Arc::new(store)
    }

    async fn small_index() -> IndexState {
        let provider = HashEmbedder::new(64);
        let chunks = vec![Chunk {
            id: "c1".into(),
            content: "INSAT-3D imager data is archived every half hour".into(),
            source_id: "insat.txt".into(),
            chunk_index: 0,
            size: 49,
        }];
        let (index, _) = VectorIndex::build(&provider, &chunks, 8).await;
        IndexState::ready(index)
    }

    #[tokio::test]
    async fn test_empty_index_with_graph() {
        let r = retriever(Some(populated_graph().await));
        let empty = IndexState::ready(VectorIndex::new("hash", 64));
        let ctx = r.retrieve(&empty, "INSAT-3D", 3).await;
        assert!(ctx.vector_hits.is_empty());
        assert!(ctx.vector_status.is_available());
        assert!(ctx.graph_hits.entities.iter().any(|n| n.name == "INSAT-3D"));
        assert_eq!(ctx.graph_hits.relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_graph_down_keeps_vector_hits() {
        let r = retriever(Some(Arc::new(DownGraph)));
        let ctx = r.retrieve(&small_index().await, "INSAT-3D imager", 3).await;
        assert_eq!(ctx.vector_hits.len(), 1);
        assert!(ctx.graph_hits.is_empty());
        assert!(matches!(ctx.graph_status, SourceStatus::Error(_)));
    }

    #[tokio::test]
    async fn test_no_graph_is_unavailable() {
        let r = retriever(None);
        let ctx = r.retrieve(&small_index().await, "INSAT-3D", 3).await;
        assert_eq!(ctx.graph_status, SourceStatus::Unavailable);
        assert_eq!(ctx.vector_hits.len(), 1);
    }

    #[tokio::test]
    async fn test_unloaded_index_reports_error() {
        let r = retriever(Some(populated_graph().await));
        let state = IndexState::Unavailable("descriptor.json missing".into());
        let ctx = r.retrieve(&state, "INSAT-3D", 3).await;
        assert!(ctx.vector_hits.is_empty());
        assert!(matches!(ctx.vector_status, SourceStatus::Error(_)));
        assert!(!ctx.graph_hits.is_empty());
    }

    #[tokio::test]
    async fn test_question_finds_graph_through_entity_terms() {
        let r = retriever(Some(populated_graph().await));
        let terms = r.graph_terms("What does INSAT-3D provide?");
        assert_eq!(terms, vec!["What does INSAT-3D provide?", "INSAT-3D"]);

        let empty = IndexState::ready(VectorIndex::new("hash", 64));
        let ctx = r.retrieve(&empty, "What does INSAT-3D provide?", 3).await;
        assert_eq!(ctx.graph_hits.relationships[0].target, "Sea Surface Temperature");
    }
}
