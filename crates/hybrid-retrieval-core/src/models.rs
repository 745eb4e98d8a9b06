//! Core data models shared by every stage of the pipeline.
//!
//! Documents enter ingestion, become [`Chunk`]s for the vector side and
//! [`Entity`]/[`Triple`] records for the graph side, and come back out of
//! retrieval as [`VectorHit`]s and [`GraphHits`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw text plus its source identifier. Immutable input to ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

/// A bounded fragment of a document's text.
///
/// `id` is a deterministic hash of `(source_id, chunk_index, content prefix)`,
/// so re-chunking the same document reproduces the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source_id: String,
    pub chunk_index: usize,
    /// Length of `content` in characters.
    pub size: usize,
}

/// A chunk returned from vector search with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Closed vocabulary of relation types between graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Provides,
    IsA,
    Launched,
    IsSatellite,
    ProducesData,
}

impl Relation {
    pub const ALL: [Relation; 5] = [
        Relation::Provides,
        Relation::IsA,
        Relation::Launched,
        Relation::IsSatellite,
        Relation::ProducesData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Provides => "PROVIDES",
            Relation::IsA => "IS_A",
            Relation::Launched => "LAUNCHED",
            Relation::IsSatellite => "IS_SATELLITE",
            Relation::ProducesData => "PRODUCES_DATA",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relation::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown relation type: {}", s))
    }
}

/// An extracted `(subject, relation, object)` fact with its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub relation: Relation,
    pub object: String,
    pub source_id: String,
}

impl Triple {
    pub fn new(
        subject: impl Into<String>,
        relation: Relation,
        object: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            relation,
            object: object.into(),
            source_id: source_id.into(),
        }
    }
}

/// Category assigned to an extracted entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLabel {
    Satellite,
    Product,
    Organization,
    Person,
    Date,
    Quantity,
    Acronym,
    Concept,
}

impl EntityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLabel::Satellite => "SATELLITE",
            EntityLabel::Product => "PRODUCT",
            EntityLabel::Organization => "ORGANIZATION",
            EntityLabel::Person => "PERSON",
            EntityLabel::Date => "DATE",
            EntityLabel::Quantity => "QUANTITY",
            EntityLabel::Acronym => "ACRONYM",
            EntityLabel::Concept => "CONCEPT",
        }
    }

    /// Domain lexicon labels outrank generic tagger labels when both
    /// claim the same span.
    pub fn priority(&self) -> u8 {
        match self {
            EntityLabel::Satellite | EntityLabel::Product => 3,
            EntityLabel::Organization | EntityLabel::Person => 2,
            EntityLabel::Date | EntityLabel::Quantity => 1,
            EntityLabel::Acronym | EntityLabel::Concept => 0,
        }
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named entity found in text. `start`/`end` are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
    pub start: usize,
    pub end: usize,
    /// The sentence the entity was found in, trimmed for display.
    pub context: String,
}

/// Kind given to nodes that were only ever seen as a triple endpoint.
pub const GENERIC_NODE_KIND: &str = "Entity";

/// A graph node, unique by exact `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
    /// Every source that contributed this node, first-seen order.
    pub provenance: Vec<String>,
}

/// A directed, typed edge between two node names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub relation: Relation,
    pub target: String,
}

/// Graph evidence for one query.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphHits {
    pub entities: Vec<GraphNode>,
    pub relationships: Vec<GraphEdge>,
}

impl GraphHits {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

/// Aggregate graph counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStatistics {
    pub nodes: u64,
    pub edges: u64,
    pub relation_types: u64,
    pub node_kinds: u64,
}

/// Availability of one evidence source for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SourceStatus {
    Available,
    Unavailable,
    Error(String),
}

impl SourceStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceStatus::Available)
    }
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_round_trips_through_str() {
        for r in Relation::ALL {
            assert_eq!(r.as_str().parse::<Relation>().unwrap(), r);
        }
        assert!("RELATES_TO".parse::<Relation>().is_err());
    }

    #[test]
    fn relation_serializes_screaming_case() {
        let json = serde_json::to_string(&Relation::ProducesData).unwrap();
        assert_eq!(json, "\"PRODUCES_DATA\"");
    }

    #[test]
    fn source_status_serializes_with_reason() {
        let json = serde_json::to_value(SourceStatus::Error("timeout".into())).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["reason"], "timeout");
    }
}
