//! Prompt and fallback answer composition.
//!
//! [`compose`] assembles the prompt sent to the generative service from
//! the two evidence blocks and the recent history. [`compose_fallback`]
//! answers directly from the evidence when no generative service is
//! reachable, and falls back further to a canned [`Topic`] answer when
//! there is no evidence at all. It never returns an empty string.

use crate::memory::preview;
use crate::models::{GraphHits, VectorHit};

pub const DEFAULT_PREVIEW_CHARS: usize = 300;

const NO_DOCUMENTS: &str = "No relevant documentation found.";
const NO_GRAPH: &str = "No relevant knowledge graph information found.";

/// One `**Source: …**` block per hit, content cut to `preview_chars`.
pub fn format_vector_context(hits: &[VectorHit], preview_chars: usize) -> String {
    hits.iter()
        .map(|h| {
            format!(
                "**Source: {}**\n{}",
                h.chunk.source_id,
                preview(&h.chunk.content, preview_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Entities and relationships as bullet lists; empty for empty hits.
pub fn format_graph_context(hits: &GraphHits) -> String {
    let mut lines = Vec::new();
    if !hits.entities.is_empty() {
        lines.push("**Entities:**".to_string());
        for n in &hits.entities {
            lines.push(format!("- {} ({})", n.name, n.kind));
        }
    }
    if !hits.relationships.is_empty() {
        lines.push("**Relationships:**".to_string());
        for e in &hits.relationships {
            lines.push(format!("- {} --[{}]--> {}", e.source, e.relation, e.target));
        }
    }
    lines.join("\n")
}

/// Prompt for the generative service.
pub fn compose(query: &str, vector_context: &str, graph_context: &str, history: &str) -> String {
    let or_default = |ctx: &str, default: &'static str| {
        if ctx.trim().is_empty() {
            default.to_string()
        } else {
            ctx.to_string()
        }
    };

    let mut prompt = String::new();
    prompt.push_str(
        "You are a helpful assistant for a meteorological and oceanographic satellite \
         data archive and its national space agency. Answer using the documentation and \
         knowledge graph evidence below.\n\n",
    );
    prompt.push_str(&format!("User Question: {}\n\n", query.trim()));
    if !history.trim().is_empty() {
        prompt.push_str("Previous Conversation:\n");
        prompt.push_str(history.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str("Available Information:\n\n");
    prompt.push_str("1. Documentation Context:\n");
    prompt.push_str(&or_default(vector_context, NO_DOCUMENTS));
    prompt.push_str("\n\n2. Knowledge Graph Context:\n");
    prompt.push_str(&or_default(graph_context, NO_GRAPH));
    prompt.push_str(
        "\n\nInstructions:\n\
         - Answer from the documentation and knowledge graph first.\n\
         - If the evidence is insufficient, say so and mark any general knowledge you add.\n\
         - Cite sources where possible.\n\n\
         Answer:",
    );
    prompt
}

/// Answer built from the evidence alone.
pub fn compose_fallback(query: &str, vector_context: &str, graph_context: &str) -> String {
    let mut parts = Vec::new();
    if !vector_context.trim().is_empty() {
        parts.push(format!("From the documentation:\n{}", vector_context.trim()));
    }
    if !graph_context.trim().is_empty() {
        parts.push(format!("From the knowledge graph:\n{}", graph_context.trim()));
    }
    if parts.is_empty() {
        return Topic::classify(query).answer().to_string();
    }
    parts.join("\n\n")
}

/// Canned answer topics used when there is no evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    DataArchive,
    SpaceAgency,
    General,
}

impl Topic {
    pub fn classify(query: &str) -> Topic {
        let q = query.to_lowercase();
        let has_any = |words: &[&str]| words.iter().any(|w| q.contains(w));
        if has_any(&["mosdac", "data", "satellite"]) {
            Topic::DataArchive
        } else if has_any(&["isro", "space", "launch"]) {
            Topic::SpaceAgency
        } else {
            Topic::General
        }
    }

    pub fn answer(&self) -> &'static str {
        match self {
            Topic::DataArchive => {
                "I couldn't find documents matching your question. MOSDAC, the \
                 Meteorological and Oceanographic Satellite Data Archival Centre, distributes \
                 satellite data from Indian and international missions, meteorological and \
                 oceanographic datasets, and derived products for weather forecasting and \
                 climate studies. Try naming a satellite such as INSAT-3D or a product such \
                 as Sea Surface Temperature."
            }
            Topic::SpaceAgency => {
                "I couldn't find documents matching your question. ISRO, the Indian Space \
                 Research Organisation, develops and launches satellites, operates Earth \
                 observation missions, and provides satellite-based services. Try asking \
                 about a specific mission or satellite."
            }
            Topic::General => {
                "I couldn't find relevant information to answer your question. I can help \
                 with satellite data and services, space missions, Earth observation, and \
                 meteorological or oceanographic data. Please try rephrasing your question."
            }
        }
    }
}
