//! Ingestion pipeline.
//!
//! Coordinates the full flow: loader → normalization → chunking and
//! extraction (parallel across documents, on blocking worker tasks) →
//! embedding into the vector index → graph merge. A document that fails
//! any per-document step is reported and skipped; the batch continues.
//!
//! The index build and publish live in [`crate::engine::Engine::ingest`],
//! which owns the single-writer lock.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use hybrid_retrieval_core::chunk::{normalize_text, Chunker};
use hybrid_retrieval_core::error::RetrievalError;
use hybrid_retrieval_core::extract::{Extraction, Extractor};
use hybrid_retrieval_core::graph::ImportSummary;
use hybrid_retrieval_core::models::{Chunk, Document};
use hybrid_retrieval_core::vector::IndexReport;

use crate::config::IngestConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Discard the current index and embed everything from scratch.
    pub rebuild: bool,
    /// Wipe the graph before importing.
    pub clear_graph: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub documents_failed: usize,
    pub chunks: usize,
    pub index: IndexReport,
    pub vector_count: usize,
    pub entities: usize,
    pub triples: usize,
    pub graph: ImportSummary,
    /// Set when the graph import was skipped or failed.
    pub graph_error: Option<String>,
}

/// Chunks and extraction results for one document.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub source_id: String,
    pub chunks: Vec<Chunk>,
    pub extraction: Extraction,
}

fn prepare_one(
    doc: &Document,
    chunker: &Chunker,
    extractor: &Extractor,
) -> Result<PreparedDocument, RetrievalError> {
    let chunks = chunker.chunk_document(doc)?;
    let normalized = Document::new(doc.source_id.clone(), normalize_text(&doc.text));
    Ok(PreparedDocument {
        source_id: doc.source_id.clone(),
        chunks,
        extraction: extractor.extract(&normalized),
    })
}

/// Chunk and extract every document, at most `concurrency` at a time.
/// Output keeps input order; failures are returned separately.
pub async fn prepare_documents(
    docs: Vec<Document>,
    chunker: Arc<Chunker>,
    extractor: Arc<Extractor>,
    concurrency: usize,
) -> (Vec<PreparedDocument>, Vec<RetrievalError>) {
    let mut set = JoinSet::new();
    let mut results: Vec<(usize, Result<PreparedDocument, RetrievalError>)> =
        Vec::with_capacity(docs.len());
    let mut failures = Vec::new();

    for (i, doc) in docs.into_iter().enumerate() {
        while set.len() >= concurrency.max(1) {
            collect_next(&mut set, &mut results, &mut failures).await;
        }
        let chunker = Arc::clone(&chunker);
        let extractor = Arc::clone(&extractor);
        set.spawn_blocking(move || {
            let result = prepare_one(&doc, &chunker, &extractor);
            (i, result, doc.source_id)
        });
    }
    while !set.is_empty() {
        collect_next(&mut set, &mut results, &mut failures).await;
    }

    results.sort_by_key(|(i, _)| *i);
    let mut prepared = Vec::with_capacity(results.len());
    for (_, result) in results {
        match result {
            Ok(p) => prepared.push(p),
            Err(e) => failures.push(e),
        }
    }
    (prepared, failures)
}

type PrepareOutput = (usize, Result<PreparedDocument, RetrievalError>, String);

async fn collect_next(
    set: &mut JoinSet<PrepareOutput>,
    results: &mut Vec<(usize, Result<PreparedDocument, RetrievalError>)>,
    failures: &mut Vec<RetrievalError>,
) {
    match set.join_next().await {
        Some(Ok((i, result, source_id))) => {
            match &result {
                Ok(p) => debug!(
                    source_id = %source_id,
                    chunks = p.chunks.len(),
                    triples = p.extraction.triples.len(),
                    "document prepared"
                ),
                Err(e) => warn!(source_id = %source_id, error = %e, "skipping document"),
            }
            results.push((i, result));
        }
        Some(Err(e)) => {
            warn!(error = %e, "document worker failed");
            failures.push(RetrievalError::Ingestion {
                source_id: "<unknown>".to_string(),
                reason: e.to_string(),
            });
        }
        None => {}
    }
}

/// Directories never descended into.
const SKIPPED_DIRS: [&str; 3] = [".git", "target", "node_modules"];

/// Build the source-id → text mapping from a directory.
///
/// Source ids are `/`-separated paths relative to `root`, and the result
/// is sorted by them. Files that are not valid UTF-8 are skipped with a
/// warning.
pub fn load_directory(root: &Path, config: &IngestConfig) -> Result<Vec<Document>> {
    if !root.is_dir() {
        bail!("Ingest root is not a directory: {}", root.display());
    }
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_type().is_dir() && SKIPPED_DIRS.iter().any(|d| e.file_name() == *d))
        });

    let mut docs = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let source_id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if exclude.is_match(&source_id) || !include.is_match(&source_id) {
            continue;
        }
        match std::fs::read_to_string(path) {
            Ok(text) => docs.push(Document::new(source_id, text)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(docs)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_retrieval_core::chunk::ChunkerConfig;
    use hybrid_retrieval_core::extract::ExtractorConfig;
    use hybrid_retrieval_core::models::Relation;
    use tempfile::TempDir;

    fn tools() -> (Arc<Chunker>, Arc<Extractor>) {
        (
            Arc::new(Chunker::new(ChunkerConfig::default()).unwrap()),
            Arc::new(Extractor::new(&ExtractorConfig::default()).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_prepare_skips_empty_documents() {
        let (chunker, extractor) = tools();
        let docs = vec![
            Document::new(
                "insat.txt",
                "INSAT-3D provides Sea Surface Temperature data over the Indian Ocean region.",
            ),
            Document::new("empty.txt", "   \n\n  "),
            Document::new(
                "scatsat.txt",
                "SCATSAT-1 measures Ocean Surface Winds using a Ku-band scatterometer instrument.",
            ),
        ];
        let (prepared, failures) = prepare_documents(docs, chunker, extractor, 2).await;

        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0].source_id, "insat.txt");
        assert_eq!(prepared[1].source_id, "scatsat.txt");
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            RetrievalError::Ingestion { source_id, .. } if source_id == "empty.txt"
        ));

        let t = &prepared[0].extraction.triples;
        assert!(t
            .iter()
            .any(|t| t.subject == "INSAT-3D" && t.relation == Relation::Provides));
    }

    #[tokio::test]
    async fn test_extraction_sees_decoded_entities() {
        let (chunker, extractor) = tools();
        let docs = vec![Document::new(
            "amp.txt",
            "INSAT-3D&nbsp;provides Soil Moisture &amp; rainfall estimates for agriculture planning.",
        )];
        let (prepared, _) = prepare_documents(docs, chunker, extractor, 1).await;
        assert!(prepared[0]
            .extraction
            .triples
            .iter()
            .any(|t| t.object == "Soil Moisture"));
    }

    #[test]
    fn test_load_directory_applies_globs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join("drafts")).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("sub/b.md"), "beta").unwrap();
        std::fs::write(root.join("c.pdf"), "gamma").unwrap();
        std::fs::write(root.join(".git/d.txt"), "delta").unwrap();
        std::fs::write(root.join("node_modules/pkg/e.md"), "epsilon").unwrap();
        std::fs::write(root.join("drafts/f.txt"), "zeta").unwrap();
        std::fs::write(root.join("bin.txt"), [0xffu8, 0xfe, 0x00]).unwrap();

        let config = IngestConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..IngestConfig::default()
        };
        let docs = load_directory(root, &config).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
    }

    #[test]
    fn test_load_directory_missing_root() {
        assert!(load_directory(Path::new("/no/such/dir"), &IngestConfig::default()).is_err());
    }
}
