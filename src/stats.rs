//! Index and graph statistics.
//!
//! A quick summary of what's stored: chunk counts and sizes, per-source
//! breakdown, on-disk footprint, and graph node/edge counts. Used by
//! `hrag stats` to confirm that ingestion did what it should.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use hybrid_retrieval_core::chunk::ChunkStats;
use hybrid_retrieval_core::models::{Chunk, GraphStatistics};

use crate::engine::Engine;
use crate::index_files::{CHUNKS_FILE, DESCRIPTOR_FILE, VECTORS_FILE};

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub chunks: Option<ChunkStats>,
    pub by_source: BTreeMap<String, usize>,
    pub index_bytes: u64,
    pub db_bytes: u64,
    pub graph: Option<GraphStatistics>,
    pub graph_error: Option<String>,
}

pub async fn collect_stats(engine: &Engine) -> StatsReport {
    let state = engine.index_state();
    let chunks: &[Chunk] = state.index().map(|i| i.chunks()).unwrap_or(&[]);

    let (graph, graph_error) = match engine.graph_statistics().await {
        Ok(s) => (Some(s), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let dir = &engine.config().index.dir;
    StatsReport {
        chunks: ChunkStats::compute(chunks),
        by_source: chunks_by_source(chunks),
        index_bytes: [VECTORS_FILE, CHUNKS_FILE, DESCRIPTOR_FILE]
            .iter()
            .map(|f| file_size(&dir.join(f)))
            .sum(),
        db_bytes: file_size(&engine.config().db.path),
        graph,
        graph_error,
    }
}

fn chunks_by_source(chunks: &[Chunk]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for c in chunks {
        *counts.entry(c.source_id.clone()).or_insert(0) += 1;
    }
    counts
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Run the stats command: collect and print a summary.
pub async fn run_stats(engine: &Engine, json: bool) -> Result<()> {
    let report = collect_stats(engine).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let config = engine.config();
    println!("Hybrid Retrieval Stats");
    println!("======================");
    println!();
    println!("  Index:       {}", config.index.dir.display());
    println!("  Size:        {}", format_bytes(report.index_bytes));
    println!("  Graph DB:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(report.db_bytes));
    println!();

    match &report.chunks {
        Some(c) => {
            println!("  Chunks:      {}", c.total_chunks);
            println!("  Sources:     {}", c.unique_sources);
            println!(
                "  Chunk size:  avg {:.0}, min {}, max {}",
                c.average_size, c.min_size, c.max_size
            );
        }
        None => println!("  Chunks:      0"),
    }

    match (&report.graph, &report.graph_error) {
        (Some(g), _) => {
            println!(
                "  Graph:       {} nodes, {} edges, {} relation types, {} node kinds",
                g.nodes, g.edges, g.relation_types, g.node_kinds
            );
        }
        (None, Some(e)) => println!("  Graph:       unavailable ({})", e),
        (None, None) => println!("  Graph:       unavailable"),
    }

    if !report.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<48} {:>8}", "SOURCE", "CHUNKS");
        println!("  {}", "-".repeat(58));
        for (source, count) in &report.by_source {
            println!("  {:<48} {:>8}", source, count);
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_chunks_by_source() {
        let chunk = |source: &str| Chunk {
            id: String::new(),
            content: String::new(),
            source_id: source.to_string(),
            chunk_index: 0,
            size: 0,
        };
        let counts = chunks_by_source(&[chunk("a.txt"), chunk("b.txt"), chunk("a.txt")]);
        assert_eq!(counts["a.txt"], 2);
        assert_eq!(counts["b.txt"], 1);
    }
}
