//! Embedding capability behind a provider trait.
//!
//! The pipeline never talks to a concrete embedding API directly; it holds an
//! `Arc<dyn EmbeddingProvider>`. The HTTP implementation speaks the
//! OpenAI-compatible `/embeddings` contract with an explicit timeout and a
//! single backoff retry. A deterministic mock provider is exported for tests
//! and for running without credentials.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::types::PipelineError;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts, one vector per input, all the same dimension.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    /// Embedding vector size.
    fn dimensions(&self) -> usize;

    /// Short human-readable identifier for logs.
    fn name(&self) -> &'static str;
}

// ── OpenAI-compatible HTTP provider ─────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Calls an OpenAI-compatible `/embeddings` endpoint over reqwest.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(PipelineError::Config(
                "embedding provider requires a non-empty API key".into(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            dimensions,
            timeout,
        })
    }

    async fn call_once(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        // Empty strings are rejected by the API; embed a single space instead.
        let sanitized: Vec<&str> = inputs
            .iter()
            .map(|t| {
                let t = t.trim();
                if t.is_empty() { " " } else { t }
            })
            .collect();

        let request = EmbeddingRequest {
            model: &self.model,
            input: sanitized,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| PipelineError::EmbeddingFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::EmbeddingFailed(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::EmbeddingFailed(err.to_string()))?;

        if parsed.data.len() != inputs.len() {
            return Err(PipelineError::EmbeddingFailed(format!(
                "expected {} vectors, got {}",
                inputs.len(),
                parsed.data.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        match self.call_once(inputs).await {
            Ok(vectors) => Ok(vectors),
            Err(first_err) => {
                // One retry with backoff; a second failure is final.
                warn!(error = %first_err, "embedding call failed, retrying once");
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.call_once(inputs).await
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

// ── Deterministic mock ──────────────────────────────────────────────────────

/// Hash-seeded deterministic embeddings: identical text always produces the
/// identical unit vector. Useful for tests and key-less local runs; similarity
/// scores are meaningless but structurally valid.
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let seed = hasher.finalize();

        // xorshift over the digest so every dimension is filled.
        let mut state = u64::from_le_bytes([
            seed[0], seed[1], seed[2], seed[3], seed[4], seed[5], seed[6], seed[7],
        ])
        .max(1);
        let mut vector = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            vector.push(((state % 2000) as f32 / 1000.0) - 1.0);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(inputs.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
