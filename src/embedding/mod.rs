//! Embedding backends and startup provider resolution.
//!
//! Implementations of [`EmbeddingProvider`]:
//! - **`hash`**: [`HashEmbedder`] from the core crate. Deterministic and offline.
//! - **[`OpenAIProvider`]**: the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`**: fastembed models run in-process (feature
//!   `local-embeddings-fastembed`).
//!
//! [`resolve_provider`] walks the primary backend and then
//! `[[embedding.fallbacks]]` in order, probing each with one embedding
//! call, and binds the first that answers with the declared dimension.
//! When nothing answers, the primary is kept unprobed and the engine
//! serves without vector evidence. The engine holds that single handle
//! for its whole lifetime; [`ProviderBinding`] records how it was chosen.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use hybrid_retrieval_core::embedding::{EmbeddingProvider, HashEmbedder};
use hybrid_retrieval_core::error::{RetrievalError, RetrievalResult};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::http;

const DEFAULT_HASH_DIMS: usize = 384;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const PROBE_TEXT: &str = "embedding provider probe";

// ============ OpenAI Provider ============

/// Calls `POST https://api.openai.com/v1/embeddings`. Reads
/// `OPENAI_API_KEY` from the environment on every call; the key is never
/// stored.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(backend: &EmbeddingBackend, config: &EmbeddingConfig) -> Result<Self> {
        let model = backend
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = backend
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            model,
            dims,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String], max_retries: u32) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            "https://api.openai.com/v1/embeddings",
            &[("Authorization", format!("Bearer {}", api_key))],
            &body,
            max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        self.request(texts, self.max_retries)
            .await
            .map_err(RetrievalError::embedding)
    }

    /// Single texts are queries or per-item fallbacks; no retry.
    async fn embed_one(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        first_vector(self.request(&[text.to_string()], 0).await)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, json_floats(embedding)?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Calls `POST /api/embed` on the configured Ollama URL (default:
/// `http://localhost:11434`). Requires the model to be pulled first
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(backend: &EmbeddingBackend, config: &EmbeddingConfig) -> Result<Self> {
        let model = backend
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = backend
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = backend
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, texts: &[String], max_retries: u32) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/embed", self.url),
            &[],
            &body,
            max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        self.request(texts, self.max_retries)
            .await
            .map_err(RetrievalError::embedding)
    }

    /// Single texts are queries or per-item fallbacks; no retry.
    async fn embed_one(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        first_vector(self.request(&[text.to_string()], 0).await)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            let values = e.as_array().ok_or_else(|| {
                anyhow::anyhow!("Invalid Ollama response: embedding is not an array")
            })?;
            json_floats(values)
        })
        .collect()
}

fn first_vector(result: Result<Vec<Vec<f32>>>) -> RetrievalResult<Vec<f32>> {
    result
        .map_err(RetrievalError::embedding)?
        .into_iter()
        .next()
        .ok_or_else(|| RetrievalError::Embedding("empty embedding response".to_string()))
}

/// Non-numeric values are rejected rather than coerced to zero.
fn json_floats(values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Runs fastembed models in-process. The model is downloaded from
/// Hugging Face on first use, then loaded once and reused.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<parking_lot::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(backend: &EmbeddingBackend, config: &EmbeddingConfig) -> Result<Self> {
        let model_name = backend
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Fail fast on unknown names.
        config_to_fastembed_model(&model_name)?;
        let dims = backend.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(parking_lot::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> RetrievalResult<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot.lock();
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(config_to_fastembed_model(&model_name)?)
                        .with_show_download_progress(false),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("local embedding model not loaded"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await
        .map_err(RetrievalError::embedding)?
        .map_err(RetrievalError::embedding)
    }
}

// ============ Resolution ============

/// Instantiate one backend without probing it.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(
    backend: &EmbeddingBackend,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match backend.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            backend.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIProvider::new(backend, config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(backend, config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(backend, config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed one probe text and check the declared dimension.
pub async fn probe(provider: &dyn EmbeddingProvider) -> RetrievalResult<()> {
    let v = provider.embed_one(PROBE_TEXT).await?;
    if v.len() != provider.dims() {
        return Err(RetrievalError::Embedding(format!(
            "{} returned {} dims, declared {}",
            provider.model_name(),
            v.len(),
            provider.dims()
        )));
    }
    Ok(())
}

/// How the bound embedding provider was chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum ProviderBinding {
    /// The configured primary answered its probe.
    Primary,
    /// A fallback answered after the primary failed.
    Fallback { provider: String },
    /// Nothing answered; the primary is held without a successful probe.
    Unverified { reason: String },
}

pub struct ResolvedProvider {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub binding: ProviderBinding,
}

/// Bind the first backend, in probe order, that answers correctly.
///
/// Errors only when the primary backend cannot even be constructed and no
/// fallback answers.
pub async fn resolve_provider(config: &EmbeddingConfig) -> Result<ResolvedProvider> {
    let mut failures = Vec::new();

    for (i, backend) in config.candidates().into_iter().enumerate() {
        let provider = match create_provider(&backend, config) {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = %backend.provider, error = %e, "embedding backend unusable");
                failures.push(format!("{}: {}", backend.provider, e));
                continue;
            }
        };
        match probe(provider.as_ref()).await {
            Ok(()) => {
                info!(
                    provider = %backend.provider,
                    model = provider.model_name(),
                    dims = provider.dims(),
                    "embedding provider bound"
                );
                let binding = if i == 0 {
                    ProviderBinding::Primary
                } else {
                    ProviderBinding::Fallback {
                        provider: backend.provider.clone(),
                    }
                };
                return Ok(ResolvedProvider { provider, binding });
            }
            Err(e) => {
                warn!(provider = %backend.provider, error = %e, "embedding probe failed");
                failures.push(format!("{}: {}", backend.provider, e));
            }
        }
    }

    let reason = failures.join("; ");
    match create_provider(&config.primary(), config) {
        Ok(provider) => {
            warn!(
                reason = %reason,
                "no embedding provider answered, serving without vector search"
            );
            Ok(ResolvedProvider {
                provider,
                binding: ProviderBinding::Unverified { reason },
            })
        }
        Err(_) => bail!("no embedding provider available ({})", reason),
    }
}
