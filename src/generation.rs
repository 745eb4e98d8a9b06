//! Generative model clients.
//!
//! The engine treats the language model as a black box:
//! `generate(prompt) -> text`. A failed call is never retried; the caller
//! falls back to an answer composed from the evidence.
//!
//! | Config Value | Client |
//! |-------------|--------|
//! | `"disabled"` | none, every answer is a fallback |
//! | `"gemini"` | [`GeminiClient`], key from `GEMINI_API_KEY` |
//! | `"ollama"` | [`OllamaGenerator`], `POST /api/generate` |

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use hybrid_retrieval_core::error::{RetrievalError, RetrievalResult};

use crate::config::GenerationConfig;
use crate::http;

const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Human-readable `provider/model` label.
    fn name(&self) -> String;

    /// Cheap availability check run once at startup.
    async fn probe(&self) -> RetrievalResult<()> {
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> RetrievalResult<String>;
}

// ============ Gemini ============

pub struct GeminiClient {
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: http::client(config.timeout_secs)?,
        })
    }

    fn api_key() -> RetrievalResult<String> {
        std::env::var("GEMINI_API_KEY")
            .map_err(|_| RetrievalError::GenerativeService("GEMINI_API_KEY not set".to_string()))
    }

    async fn request(&self, prompt: &str, api_key: String) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/models/{}:generateContent", self.base_url, self.model),
            &[("x-goog-api-key", api_key)],
            &body,
            0,
            "Gemini",
        )
        .await?;
        parse_gemini_response(&json)
    }
}

#[async_trait]
impl GenerativeService for GeminiClient {
    fn name(&self) -> String {
        format!("gemini/{}", self.model)
    }

    async fn probe(&self) -> RetrievalResult<()> {
        Self::api_key().map(|_| ())
    }

    async fn generate(&self, prompt: &str) -> RetrievalResult<String> {
        let key = Self::api_key()?;
        self.request(prompt, key)
            .await
            .map_err(|e| RetrievalError::GenerativeService(e.to_string()))
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate parts"))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        anyhow::bail!("Gemini returned an empty answer");
    }
    Ok(text)
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: http::client(config.timeout_secs)?,
        })
    }

    async fn request(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            &[],
            &body,
            0,
            "Ollama",
        )
        .await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response"))?;
        if text.trim().is_empty() {
            anyhow::bail!("Ollama returned an empty answer");
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl GenerativeService for OllamaGenerator {
    fn name(&self) -> String {
        format!("ollama/{}", self.model)
    }

    async fn probe(&self) -> RetrievalResult<()> {
        let url = format!("{}/api/tags", self.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RetrievalError::GenerativeService(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::GenerativeService(format!(
                "Ollama returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> RetrievalResult<String> {
        self.request(prompt)
            .await
            .map_err(|e| RetrievalError::GenerativeService(e.to_string()))
    }
}

/// Build and probe the configured client. `None` means every answer is
/// composed without a model.
pub async fn resolve_generator(config: &GenerationConfig) -> Option<Arc<dyn GenerativeService>> {
    if !config.is_enabled() {
        info!("generation disabled, answers will use fallback");
        return None;
    }

    let client: Arc<dyn GenerativeService> = match config.provider.as_str() {
        "gemini" => match GeminiClient::new(config) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(error = %e, "generative client unusable, answers will use fallback");
                return None;
            }
        },
        "ollama" => match OllamaGenerator::new(config) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(error = %e, "generative client unusable, answers will use fallback");
                return None;
            }
        },
        other => {
            warn!(provider = %other, "unknown generation provider, answers will use fallback");
            return None;
        }
    };

    match client.probe().await {
        Ok(()) => {
            info!(service = %client.name(), "generative service available");
            Some(client)
        }
        Err(e) => {
            warn!(service = %client.name(), error = %e, "generative service unavailable, answers will use fallback");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "INSAT-3D " }, { "text": "provides SST." }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "INSAT-3D provides SST.");
        assert!(parse_gemini_response(&serde_json::json!({ "candidates": [] })).is_err());
    }

    #[tokio::test]
    async fn test_disabled_resolves_to_none() {
        assert!(resolve_generator(&GenerationConfig::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_ollama_resolves_to_none() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("llama3".to_string()),
            url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 2,
        };
        assert!(resolve_generator(&config).await.is_none());
    }
}
