//! Recursive-separator text chunker with overlap.
//!
//! Splits normalized document text into [`Chunk`]s no longer than
//! `chunk_size` characters. Splitting prefers the coarsest separator that
//! still occurs in the text and falls back to finer ones only for pieces
//! that remain too large:
//!
//! ```text
//! "\n\n"  →  "\n"  →  ". " / "! " / "? "  →  " "  →  single characters
//! ```
//!
//! Neighbouring fragments share up to `overlap` characters: when a
//! fragment is flushed, the tail pieces that fit in the overlap budget are
//! carried into the next one.
//!
//! Each chunk id is the SHA-256 of `(source_id, ordinal, first 100 chars)`,
//! so re-chunking an unchanged document reproduces the same ids.
//!
//! # Example
//!
//! ```rust
//! use hybrid_retrieval_core::chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let text = "INSAT-3D provides Sea Surface Temperature data for the Indian Ocean region.";
//! let chunks = chunker.chunk("insat.txt", text);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use std::collections::{HashSet, VecDeque};

use anyhow::{bail, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{RetrievalError, RetrievalResult};
use crate::models::{Chunk, Document};

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters and always applies.
const SEPARATORS: [&str; 7] = ["\n\n", "\n", ". ", "! ", "? ", " ", ""];

/// Number of leading characters of a chunk that feed its id.
const ID_PREFIX_CHARS: usize = 100;

/// Chunking limits, all measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    /// Fragments shorter than this are dropped as noise.
    pub min_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            min_chars: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker. Fails unless `0 <= overlap < chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if config.overlap >= config.chunk_size {
            bail!(
                "overlap ({}) must be smaller than chunk_size ({})",
                config.overlap,
                config.chunk_size
            );
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk one document, reporting an empty document as an ingestion
    /// failure so batch callers can skip it.
    pub fn chunk_document(&self, doc: &Document) -> RetrievalResult<Vec<Chunk>> {
        let normalized = normalize_text(&doc.text);
        if normalized.is_empty() {
            return Err(RetrievalError::Ingestion {
                source_id: doc.source_id.clone(),
                reason: "document is empty after normalization".to_string(),
            });
        }
        Ok(self.chunk_normalized(&doc.source_id, &normalized))
    }

    /// Normalize and split `text`. Returns an empty vector when nothing
    /// survives the minimum-length filter.
    pub fn chunk(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        self.chunk_normalized(source_id, &normalized)
    }

    fn chunk_normalized(&self, source_id: &str, text: &str) -> Vec<Chunk> {
        self.split_recursive(text, &SEPARATORS)
            .iter()
            .enumerate()
            .filter_map(|(ordinal, fragment)| {
                let content = fragment.trim();
                if content.chars().count() < self.config.min_chars {
                    return None;
                }
                Some(make_chunk(source_id, ordinal, content))
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let mut fragments = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) <= self.config.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                fragments.extend(self.merge_pieces(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                fragments.extend(hard_split(piece, self.config.chunk_size));
            } else {
                fragments.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            fragments.extend(self.merge_pieces(&pending));
        }
        fragments
    }

    /// Greedily pack small pieces into fragments of at most `chunk_size`
    /// characters, carrying a tail of at most `overlap` characters forward.
    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkerConfig {
            chunk_size,
            overlap,
            ..
        } = self.config;

        let mut fragments = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > chunk_size && !window.is_empty() {
                push_fragment(&mut fragments, &window);
                while total > overlap || (total > 0 && total + len > chunk_size) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }
            window.push_back((piece, len));
            total += len;
        }

        push_fragment(&mut fragments, &window);
        fragments
    }
}

fn push_fragment(fragments: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        fragments.push(trimmed.to_string());
    }
}

/// Split on `separator`, keeping it attached to the end of each piece so
/// that re-joining the pieces reproduces the input exactly.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split_inclusive(separator)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|window| window.iter().collect::<String>())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn make_chunk(source_id: &str, ordinal: usize, content: &str) -> Chunk {
    let prefix: String = content.chars().take(ID_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}_{}", source_id, ordinal, prefix).as_bytes());
    let id = format!("{:x}", hasher.finalize());

    Chunk {
        id,
        content: content.to_string(),
        source_id: source_id.to_string(),
        chunk_index: ordinal,
        size: char_len(content),
    }
}

/// Decode common HTML entities and normalize whitespace.
///
/// Runs of spaces and tabs collapse to one space, lines are trimmed, and
/// any run of blank lines collapses to a single paragraph break. Paragraph
/// and line structure survive so the splitter can still prefer them.
pub fn normalize_text(text: &str) -> String {
    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    let mut out = String::with_capacity(decoded.len());
    let mut blank_run = false;

    for line in decoded.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run = true;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        blank_run = false;
    }

    out
}

/// Summary figures over a chunk set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: usize,
    pub unique_sources: usize,
    pub average_size: f64,
    pub min_size: usize,
    pub max_size: usize,
}

impl ChunkStats {
    /// `None` when `chunks` is empty.
    pub fn compute(chunks: &[Chunk]) -> Option<Self> {
        if chunks.is_empty() {
            return None;
        }
        let total: usize = chunks.iter().map(|c| c.size).sum();
        let sources: HashSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        Some(Self {
            total_chunks: chunks.len(),
            unique_sources: sources.len(),
            average_size: total as f64 / chunks.len() as f64,
            min_size: chunks.iter().map(|c| c.size).min().unwrap_or(0),
            max_size: chunks.iter().map(|c| c.size).max().unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize, min_chars: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            overlap,
            min_chars,
        })
        .unwrap()
    }

    fn long_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Sentence number {} describes the ocean colour monitor aboard the satellite.",
                    i
                )
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        let err = Chunker::new(ChunkerConfig {
            chunk_size: 100,
            overlap: 100,
            min_chars: 0,
        });
        assert!(err.is_err());
        assert!(Chunker::new(ChunkerConfig {
            chunk_size: 0,
            overlap: 0,
            min_chars: 0
        })
        .is_err());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let c = chunker(500, 50, 10);
        let chunks = c.chunk("a.txt", "MOSDAC archives meteorological satellite data.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].source_id, "a.txt");
        assert_eq!(chunks[0].size, chunks[0].content.chars().count());
    }

    #[test]
    fn test_short_fragments_dropped() {
        let c = chunker(500, 50, 50);
        assert!(c.chunk("a.txt", "Too short.").is_empty());
    }

    #[test]
    fn test_empty_document_is_ingestion_error() {
        let c = chunker(500, 50, 50);
        let err = c.chunk_document(&Document::new("empty.txt", "  \n\n \t ")).unwrap_err();
        assert!(matches!(err, RetrievalError::Ingestion { .. }));
    }

    #[test]
    fn test_chunks_respect_size_limit() {
        let c = chunker(120, 20, 10);
        let chunks = c.chunk("doc", &long_text());
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.size <= 120, "chunk too large: {}", chunk.size);
        }
    }

    #[test]
    fn test_unbroken_text_falls_back_to_characters() {
        let c = chunker(30, 5, 1);
        let text = "x".repeat(100);
        let chunks = c.chunk("doc", &text);
        assert!(chunks.len() >= 4);
        assert!(chunks.iter().all(|ch| ch.size <= 30));
    }

    #[test]
    fn test_neighbouring_chunks_overlap() {
        let c = chunker(60, 20, 10);
        let text = (0..60)
            .map(|i| format!("tok{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = c.chunk("doc", &text);
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].content.split_whitespace().last().unwrap();
            assert!(
                pair[1].content.starts_with(last_word)
                    || pair[1].content.contains(&format!(" {}", last_word)),
                "expected '{}' carried into next chunk",
                last_word
            );
            assert!(pair[0].size <= 60);
        }
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let c = chunker(80, 0, 5);
        let text = "First paragraph talks about INSAT-3D imagery.\n\nSecond paragraph covers rainfall products.";
        let chunks = c.chunk("doc", text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("First"));
        assert!(chunks[1].content.starts_with("Second"));
    }

    #[test]
    fn test_deterministic_ids() {
        let c = chunker(100, 20, 10);
        let text = long_text();
        let a: Vec<String> = c.chunk("doc", &text).into_iter().map(|ch| ch.id).collect();
        let b: Vec<String> = c.chunk("doc", &text).into_iter().map(|ch| ch.id).collect();
        assert_eq!(a, b);
        let unique: HashSet<&String> = a.iter().collect();
        assert_eq!(unique.len(), a.len());
    }

    #[test]
    fn test_ids_depend_on_source() {
        let c = chunker(500, 50, 10);
        let text = "Scatterometer winds are derived from SCATSAT-1 observations.";
        let a = c.chunk("one.txt", text);
        let b = c.chunk("two.txt", text);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_multibyte_text() {
        let c = chunker(20, 4, 1);
        let text = "┌──────────────────┐ मौसम उपग्रह डेटा ┘ régions côtières";
        let chunks = c.chunk("doc", text);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|ch| ch.size <= 20));
    }

    #[test]
    fn test_normalize_text() {
        let raw = "Ocean&nbsp;&amp;  Land \t data\r\n\n\n\nSecond   para&lt;x&gt;\nline";
        assert_eq!(
            normalize_text(raw),
            "Ocean & Land data\n\nSecond para<x>\nline"
        );
        assert_eq!(normalize_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_chunk_stats() {
        let c = chunker(100, 10, 10);
        let mut chunks = c.chunk("a", &long_text());
        chunks.extend(c.chunk("b", "Kalpana-1 carried a very high resolution radiometer."));
        let stats = ChunkStats::compute(&chunks).unwrap();
        assert_eq!(stats.total_chunks, chunks.len());
        assert_eq!(stats.unique_sources, 2);
        assert!(stats.min_size <= stats.max_size);
        assert!(ChunkStats::compute(&[]).is_none());
    }
}
