//! In-memory [`GraphStore`] for tests and ephemeral engines.
//!
//! Nodes live in a `BTreeMap` keyed by name so lookups come back in name
//! order, matching the SQLite store. Everything sits behind one
//! `parking_lot::RwLock`; a merge holds the write lock for the whole batch.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::RetrievalResult;
use crate::models::{Entity, GraphEdge, GraphNode, GraphStatistics, Triple, GENERIC_NODE_KIND};

use super::{node_kind, GraphStore, ImportSummary};

#[derive(Default)]
struct GraphState {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    edge_keys: HashSet<GraphEdge>,
}

impl GraphState {
    /// Returns `true` when the node was created.
    fn merge_node(&mut self, name: &str, source_id: &str) -> bool {
        let mut created = false;
        let node = self.nodes.entry(name.to_string()).or_insert_with(|| {
            created = true;
            GraphNode {
                name: name.to_string(),
                kind: GENERIC_NODE_KIND.to_string(),
                description: None,
                provenance: Vec::new(),
            }
        });
        if !source_id.is_empty() && !node.provenance.iter().any(|s| s == source_id) {
            node.provenance.push(source_id.to_string());
        }
        created
    }
}

pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
        }
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn import_triples(&self, triples: &[Triple]) -> RetrievalResult<ImportSummary> {
        let mut state = self.state.write();
        let mut summary = ImportSummary::default();
        for t in triples {
            if state.merge_node(&t.subject, &t.source_id) {
                summary.nodes_created += 1;
            }
            if state.merge_node(&t.object, &t.source_id) {
                summary.nodes_created += 1;
            }
            let edge = GraphEdge {
                source: t.subject.clone(),
                relation: t.relation,
                target: t.object.clone(),
            };
            if state.edge_keys.insert(edge.clone()) {
                state.edges.push(edge);
                summary.edges_created += 1;
            }
        }
        Ok(summary)
    }

    async fn import_entities(
        &self,
        entities: &[Entity],
        source_id: &str,
    ) -> RetrievalResult<ImportSummary> {
        let mut state = self.state.write();
        let mut summary = ImportSummary::default();
        for e in entities {
            if state.merge_node(&e.text, source_id) {
                summary.nodes_created += 1;
            }
            if let Some(node) = state.nodes.get_mut(&e.text) {
                if node.kind == GENERIC_NODE_KIND {
                    node.kind = node_kind(e.label).to_string();
                }
                if node.description.is_none() && !e.context.is_empty() {
                    node.description = Some(e.context.clone());
                }
            }
        }
        Ok(summary)
    }

    async fn lookup_entities(&self, term: &str, limit: usize) -> RetrievalResult<Vec<GraphNode>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        Ok(state
            .nodes
            .values()
            .filter(|n| {
                contains_ci(&n.name, &needle)
                    || contains_ci(&n.kind, &needle)
                    || n.description
                        .as_deref()
                        .is_some_and(|d| contains_ci(d, &needle))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn lookup_relationships(
        &self,
        term: &str,
        limit: usize,
    ) -> RetrievalResult<Vec<GraphEdge>> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        let mut edges: Vec<GraphEdge> = state
            .edges
            .iter()
            .filter(|e| {
                contains_ci(&e.source, &needle)
                    || contains_ci(&e.target, &needle)
                    || contains_ci(e.relation.as_str(), &needle)
            })
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            (&a.source, a.relation.as_str(), &a.target).cmp(&(
                &b.source,
                b.relation.as_str(),
                &b.target,
            ))
        });
        edges.truncate(limit);
        Ok(edges)
    }

    async fn statistics(&self) -> RetrievalResult<GraphStatistics> {
        let state = self.state.read();
        let relation_types: HashSet<_> = state.edges.iter().map(|e| e.relation).collect();
        let node_kinds: HashSet<_> = state.nodes.values().map(|n| n.kind.as_str()).collect();
        Ok(GraphStatistics {
            nodes: state.nodes.len() as u64,
            edges: state.edges.len() as u64,
            relation_types: relation_types.len() as u64,
            node_kinds: node_kinds.len() as u64,
        })
    }

    async fn clear(&self) -> RetrievalResult<()> {
        *self.state.write() = GraphState::default();
        Ok(())
    }

    async fn health(&self) -> RetrievalResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityLabel, Relation};

    fn triples() -> Vec<Triple> {
        vec![
            Triple::new("INSAT-3D", Relation::Provides, "Sea Surface Temperature", "a.txt"),
            Triple::new("ISRO", Relation::Launched, "INSAT-3D", "b.txt"),
        ]
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let first = store.import_triples(&triples()).await.unwrap();
        assert_eq!(first.nodes_created, 3);
        assert_eq!(first.edges_created, 2);

        let before = store.statistics().await.unwrap();
        let second = store.import_triples(&triples()).await.unwrap();
        assert_eq!(second, ImportSummary::default());
        assert_eq!(store.statistics().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_provenance_accumulates() {
        let store = InMemoryGraphStore::new();
        store.import_triples(&triples()).await.unwrap();
        let nodes = store.lookup_entities("insat-3d", 5).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].provenance, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_entity_import_upgrades_kind() {
        let store = InMemoryGraphStore::new();
        store.import_triples(&triples()).await.unwrap();
        let entity = Entity {
            text: "INSAT-3D".to_string(),
            label: EntityLabel::Satellite,
            start: 0,
            end: 8,
            context: "INSAT-3D is a meteorological satellite.".to_string(),
        };
        store.import_entities(&[entity.clone()], "c.txt").await.unwrap();

        let node = &store.lookup_entities("INSAT-3D", 5).await.unwrap()[0];
        assert_eq!(node.kind, "Satellite");
        assert_eq!(
            node.description.as_deref(),
            Some("INSAT-3D is a meteorological satellite.")
        );

        let other = Entity {
            context: "A later sentence.".to_string(),
            ..entity
        };
        store.import_entities(&[other], "d.txt").await.unwrap();
        let node = &store.lookup_entities("INSAT-3D", 5).await.unwrap()[0];
        assert_eq!(
            node.description.as_deref(),
            Some("INSAT-3D is a meteorological satellite.")
        );
        assert_eq!(node.provenance.len(), 4);
    }

    #[tokio::test]
    async fn test_lookups_match_substrings() {
        let store = InMemoryGraphStore::new();
        store.import_triples(&triples()).await.unwrap();

        let rels = store.lookup_relationships("surface", 5).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relation, Relation::Provides);

        let by_type = store.lookup_relationships("launched", 5).await.unwrap();
        assert_eq!(by_type[0].source, "ISRO");

        assert_eq!(store.lookup_entities("INSAT", 1).await.unwrap().len(), 1);
        assert!(store.lookup_entities("  ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryGraphStore::new();
        store.import_triples(&triples()).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.statistics().await.unwrap(), GraphStatistics::default());
    }
}
