//! Text embeddings
//!
//! DashScope embedding API client plus a hash-based double that needs no
//! upstream (tests, degraded wiring).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use chat_agent_config::EmbeddingSettings;

use crate::LlmError;

/// Text → fixed-dimension vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text; an empty vector means the text could not be
    /// embedded and callers skip the write
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Embed multiple texts, batched
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embedding dimension
    fn dim(&self) -> usize;
}

/// DashScope embedding client
pub struct DashScopeEmbedder {
    client: reqwest::Client,
    settings: EmbeddingSettings,
    api_key: String,
}

impl DashScopeEmbedder {
    pub fn new(settings: EmbeddingSettings, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, settings, api_key: api_key.into() })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            headers.insert(AUTHORIZATION, auth);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbedRequest {
            model: &self.settings.model,
            input: EmbedInput { texts },
        };

        let response = self
            .client
            .post(&self.settings.api_url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Embedding(format!("HTTP {status}: {text}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Embedding(format!("failed to parse response: {e}")))?;

        Ok(parsed.output.embeddings.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for DashScopeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut embeddings = self.request(&[text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| LlmError::Embedding("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.settings.batch_size.max(1)) {
            all.extend(self.request(chunk).await?);
        }
        Ok(all)
    }

    fn dim(&self) -> usize {
        self.settings.dim
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: EmbedInput<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedInput<'a> {
    texts: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    output: EmbedOutput,
}

#[derive(Debug, Deserialize)]
struct EmbedOutput {
    #[serde(default)]
    embeddings: Vec<EmbedVector>,
}

#[derive(Debug, Deserialize)]
struct EmbedVector {
    embedding: Vec<f32>,
}

/// Hash-based embedder (no model required)
///
/// Deterministic: identical text maps to identical unit vectors, so cosine
/// search against an exact copy scores 1.0.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];
        for (i, c) in text.chars().enumerate() {
            let index = (c as usize + i) % self.dim;
            embedding[index] += 1.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(1536)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
