//! Graph storage abstraction.
//!
//! The [`GraphStore`] trait is the merge-deduplicated labeled graph the
//! retriever queries. Nodes are unique by exact name; edges are unique by
//! `(source, relation, target)`. Every write is a merge, so importing the
//! same triples twice changes nothing.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`import_triples`](GraphStore::import_triples) | Merge triple endpoints and edges |
//! | [`import_entities`](GraphStore::import_entities) | Merge typed nodes with description and provenance |
//! | [`lookup_entities`](GraphStore::lookup_entities) | Substring match on name, kind, description |
//! | [`lookup_relationships`](GraphStore::lookup_relationships) | Substring match on endpoints and relation type |
//! | [`statistics`](GraphStore::statistics) | Node/edge/type counts |
//! | [`clear`](GraphStore::clear) | Destructive wipe |
//! | [`health`](GraphStore::health) | Connectivity probe |
//!
//! The SQLite implementation lives in the app crate; [`memory`] holds the
//! in-process one.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RetrievalResult;
use crate::models::{Entity, EntityLabel, GraphEdge, GraphNode, GraphStatistics, Triple};

/// Counts of rows actually created by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub nodes_created: u64,
    pub edges_created: u64,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn import_triples(&self, triples: &[Triple]) -> RetrievalResult<ImportSummary>;

    /// Merge typed nodes. A node first seen as a bare triple endpoint has
    /// its generic kind upgraded; an empty description is filled from the
    /// entity's context sentence.
    async fn import_entities(
        &self,
        entities: &[Entity],
        source_id: &str,
    ) -> RetrievalResult<ImportSummary>;

    async fn lookup_entities(&self, term: &str, limit: usize) -> RetrievalResult<Vec<GraphNode>>;

    async fn lookup_relationships(
        &self,
        term: &str,
        limit: usize,
    ) -> RetrievalResult<Vec<GraphEdge>>;

    async fn statistics(&self) -> RetrievalResult<GraphStatistics>;

    async fn clear(&self) -> RetrievalResult<()>;

    async fn health(&self) -> RetrievalResult<()>;
}

/// Node kind stored for an entity label.
pub fn node_kind(label: EntityLabel) -> &'static str {
    match label {
        EntityLabel::Satellite => "Satellite",
        EntityLabel::Product => "Product",
        EntityLabel::Organization => "Organization",
        EntityLabel::Person => "Person",
        EntityLabel::Date => "Date",
        EntityLabel::Quantity => "Quantity",
        EntityLabel::Acronym => "Acronym",
        EntityLabel::Concept => "Concept",
    }
}
