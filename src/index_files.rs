//! On-disk layout of the vector index.
//!
//! ```text
//! <index.dir>/
//!   index.bin        row-major little-endian f32 vectors
//!   chunks.json      row-aligned chunk metadata
//!   descriptor.json  {model_name, dimension, vector_count}
//! ```
//!
//! Files are written to `*.tmp` siblings and renamed into place, with
//! `descriptor.json` renamed last. A reader that finds a descriptor
//! therefore finds the matching blob and metadata next to it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use hybrid_retrieval_core::embedding::EmbeddingProvider;
use hybrid_retrieval_core::error::{RetrievalError, RetrievalResult};
use hybrid_retrieval_core::models::Chunk;
use hybrid_retrieval_core::vector::{IndexDescriptor, IndexState, VectorIndex};

pub const VECTORS_FILE: &str = "index.bin";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const DESCRIPTOR_FILE: &str = "descriptor.json";

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

pub fn save_index(dir: &Path, index: &VectorIndex) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index dir {}", dir.display()))?;

    write_atomic(&dir.join(VECTORS_FILE), &index.to_blob())?;
    write_atomic(
        &dir.join(CHUNKS_FILE),
        &serde_json::to_vec(index.chunks()).context("Failed to serialize chunk metadata")?,
    )?;
    write_atomic(
        &dir.join(DESCRIPTOR_FILE),
        &serde_json::to_vec_pretty(&index.descriptor()).context("Failed to serialize descriptor")?,
    )?;

    info!(
        dir = %dir.display(),
        vectors = index.len(),
        dimension = index.dimension(),
        "vector index saved"
    );
    Ok(())
}

fn read_file(path: &Path) -> RetrievalResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| RetrievalError::IndexLoad(format!("cannot read {}: {}", path.display(), e)))
}

pub fn read_descriptor(dir: &Path) -> RetrievalResult<IndexDescriptor> {
    let path = dir.join(DESCRIPTOR_FILE);
    serde_json::from_slice(&read_file(&path)?)
        .map_err(|e| RetrievalError::IndexLoad(format!("invalid {}: {}", path.display(), e)))
}

/// Row-aligned chunk metadata, readable even when the vectors are not
/// usable with the current model.
pub fn read_chunks(dir: &Path) -> RetrievalResult<Vec<Chunk>> {
    let path = dir.join(CHUNKS_FILE);
    serde_json::from_slice(&read_file(&path)?)
        .map_err(|e| RetrievalError::IndexLoad(format!("invalid {}: {}", path.display(), e)))
}

/// Load and validate against the bound model. Fails closed.
pub fn load_index(
    dir: &Path,
    model_name: &str,
    dimension: usize,
) -> RetrievalResult<VectorIndex> {
    let descriptor = read_descriptor(dir)?;
    let chunks = read_chunks(dir)?;
    let blob = read_file(&dir.join(VECTORS_FILE))?;
    let index = VectorIndex::from_parts(descriptor, &blob, chunks, model_name, dimension)?;
    debug!(dir = %dir.display(), vectors = index.len(), "vector index loaded");
    Ok(index)
}

/// Load for serving: any failure becomes [`IndexState::Unavailable`].
pub fn load_state(dir: &Path, provider: &dyn EmbeddingProvider) -> IndexState {
    match load_index(dir, provider.model_name(), provider.dims()) {
        Ok(index) => IndexState::ready(index),
        Err(e) => {
            let reason = match e {
                RetrievalError::IndexLoad(reason) => reason,
                other => other.to_string(),
            };
            IndexState::Unavailable(reason)
        }
    }
}

/// Like [`load_state`], but a directory that has never held an index
/// serves an empty one bound to `provider`.
pub fn open_state(dir: &Path, provider: &dyn EmbeddingProvider) -> IndexState {
    if !dir.join(DESCRIPTOR_FILE).exists() && !dir.join(VECTORS_FILE).exists() {
        debug!(dir = %dir.display(), "no index on disk, starting empty");
        return IndexState::ready(VectorIndex::for_provider(provider));
    }
    load_state(dir, provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_retrieval_core::embedding::{cosine_similarity, HashEmbedder};
    use tempfile::TempDir;

    fn chunks() -> Vec<Chunk> {
        ["INSAT-3D imager sounder data", "OCEANSAT-3 ocean colour monitor"]
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: format!("c{}", i),
                content: text.to_string(),
                source_id: "sat.txt".to_string(),
                chunk_index: i,
                size: text.len(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_save_load_preserves_vectors() {
        let tmp = TempDir::new().unwrap();
        let provider = HashEmbedder::new(64);
        let (index, _) = VectorIndex::build(&provider, &chunks(), 8).await;
        save_index(tmp.path(), &index).unwrap();

        let loaded = load_index(tmp.path(), "hash", 64).unwrap();
        assert_eq!(loaded.len(), 2);
        for (row, chunk) in loaded.chunks().iter().enumerate() {
            let fresh = provider.embed_text(&chunk.content);
            let sim = cosine_similarity(&fresh, loaded.row_vector(row).unwrap());
            assert!((sim - 1.0).abs() < 1e-5);
        }
        assert!(!tmp.path().join("descriptor.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let (index, _) = VectorIndex::build(&HashEmbedder::new(64), &chunks(), 8).await;
        save_index(tmp.path(), &index).unwrap();

        let state = load_state(tmp.path(), &HashEmbedder::new(32));
        assert!(matches!(state, IndexState::Unavailable(_)));
        // Metadata stays readable for a rebuild.
        assert_eq!(read_chunks(tmp.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_files_fail_closed() {
        let tmp = TempDir::new().unwrap();
        let state = load_state(tmp.path(), &HashEmbedder::new(32));
        assert!(matches!(state, IndexState::Unavailable(_)));
    }

    #[test]
    fn test_fresh_dir_opens_empty() {
        let tmp = TempDir::new().unwrap();
        let state = open_state(&tmp.path().join("index"), &HashEmbedder::new(32));
        assert!(state.status().is_available());
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_blob_fails_closed() {
        let tmp = TempDir::new().unwrap();
        let (index, _) = VectorIndex::build(&HashEmbedder::new(16), &chunks(), 8).await;
        save_index(tmp.path(), &index).unwrap();
        std::fs::write(tmp.path().join(VECTORS_FILE), [0u8; 12]).unwrap();

        let err = load_index(tmp.path(), "hash", 16).unwrap_err();
        assert!(matches!(err, RetrievalError::IndexLoad(_)));
    }
}
