//! Error taxonomy for the retrieval pipeline.
//!
//! Every variant except [`RetrievalError::InvalidQuery`] describes a
//! degraded dependency. Callers above the chat boundary turn those into
//! empty evidence or a fallback answer; only invalid caller input is
//! surfaced as a hard error.

use thiserror::Error;

/// Result alias used across the core crate.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    /// A document could not be read or normalized; it is skipped.
    #[error("ingestion failed for '{source_id}': {reason}")]
    Ingestion { source_id: String, reason: String },

    /// The embedding backend failed for a batch or a single text.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The persisted vector index is missing or does not match the
    /// bound embedding model. The index declines to serve search.
    #[error("vector index unavailable: {0}")]
    IndexLoad(String),

    /// The graph backend could not be reached or a query failed.
    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    /// The generative model call failed.
    #[error("generative service failed: {0}")]
    GenerativeService(String),

    /// Missing or empty query from the caller.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl RetrievalError {
    /// Wrap any displayable error as a graph failure.
    pub fn graph(err: impl std::fmt::Display) -> Self {
        Self::GraphUnavailable(err.to_string())
    }

    /// Wrap any displayable error as an embedding failure.
    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }
}
