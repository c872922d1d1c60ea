//! Embedding provider abstraction and implementations.
//!
//! Three adapters sit behind the [`EmbeddingProvider`] trait:
//! - **[`MockProvider`]** — deterministic hash-derived vectors; no network.
//!   Useful for tests and offline indexing.
//! - **[`LocalProvider`]** — a local HTTP model server speaking the
//!   `/api/embed` convention (Ollama-compatible).
//! - **[`ApiProvider`]** — a hosted `/v1/embeddings` endpoint with bearer
//!   auth from the `LORE_API_KEY` environment variable.
//!
//! All vectors are unit-normalized before they leave this module, so
//! cosine similarity reduces to a dot product over stored vectors.
//!
//! # Retry Strategy
//!
//! HTTP providers retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

pub mod manager;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::CoreError;

/// Dimensionality of mock vectors.
const MOCK_DIMS: usize = 64;

/// A single-method embedding capability. Implementations must be
/// deterministic for a given model: the same text always embeds to the
/// same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded next to each stored vector.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Create the configured provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Box::new(MockProvider)),
        "local" => Ok(Box::new(LocalProvider::new(config))),
        "api" => Ok(Box::new(ApiProvider::new(config)?)),
        "disabled" => Ok(Box::new(DisabledProvider)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled provider ============

/// Always errors; used when embeddings are switched off.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(CoreError::ProviderUnavailable("embedding provider is disabled".into()).into())
    }
}

// ============ Mock provider ============

/// Deterministic offline provider. Vectors are derived from a SHA-256 of
/// the text, so equal texts embed identically and similar-length texts do
/// not collide.
pub struct MockProvider;

#[async_trait]
impl EmbeddingProvider for MockProvider {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| mock_vector(t)).collect())
    }
}

fn mock_vector(text: &str) -> Vec<f32> {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();

    let mut vec = Vec::with_capacity(MOCK_DIMS);
    for i in 0..MOCK_DIMS {
        let byte = digest[i % digest.len()];
        // Mix the index in so the vector is not periodic in the digest.
        let v = ((byte as i32) ^ ((i as i32) * 37 % 251)) as f32 / 255.0 - 0.5;
        vec.push(v);
    }
    normalize(&mut vec);
    vec
}

// ============ Local HTTP provider ============

/// Local model server speaking `POST {url}/api/embed`.
pub struct LocalProvider {
    model: String,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                CoreError::ProviderUnavailable("embed response missing embeddings array".into())
            })?;

        let mut out = Vec::with_capacity(embeddings.len());
        for item in embeddings {
            let mut vec: Vec<f32> = item
                .as_array()
                .ok_or_else(|| {
                    CoreError::ProviderUnavailable("embedding is not an array".into())
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            normalize(&mut vec);
            out.push(vec);
        }
        Ok(out)
    }
}

// ============ API provider ============

/// Hosted embeddings endpoint speaking `POST {url}/v1/embeddings` with a
/// bearer token read from `LORE_API_KEY`.
pub struct ApiProvider {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    timeout_secs: u64,
}

impl ApiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for api provider"))?;
        let api_key = std::env::var("LORE_API_KEY")
            .map_err(|_| anyhow::anyhow!("LORE_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for ApiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
            CoreError::ProviderUnavailable("embeddings response missing data array".into())
        })?;

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let mut vec: Vec<f32> = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    CoreError::ProviderUnavailable("response item missing embedding".into())
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            normalize(&mut vec);
            out.push(vec);
        }
        Ok(out)
    }
}

/// POST JSON with the shared retry/backoff policy. Also used by the
/// completion provider.
pub(crate) async fn post_with_retry(
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    timeout_secs: u64,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("embedding API error {}: {}", status, text));
                    continue;
                }
                let text = response.text().await.unwrap_or_default();
                bail!("embedding API error {}: {}", status, text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| CoreError::ProviderUnavailable("embedding failed after retries".into()).into()))
}

// ============ Vector utilities ============

/// Scale a vector to unit length in place. Zero vectors are left as-is.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity. Returns 0.0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// SHA-256 of a text, used to key embedding caches and coalesce requests.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
