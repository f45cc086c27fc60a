//! ============================================================================
//! Embeddings - Text embedding client for semantic memory
//! ============================================================================
//! Turns message text into fixed-dimension vectors via an OpenAI-compatible
//! embeddings endpoint:
//! - Batch embedding with per-request timeout
//! - Dimension validation on every returned vector
//! - Pluggable through the Embedder trait so tests can stub the service
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::memory::MemoryError;

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Vector dimension produced by the default model
pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

/// HTTP timeout for embedding requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can embed text into fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// Dimension of every vector this embedder produces
    fn dimension(&self) -> usize;
}

/// Client for an OpenAI-compatible embeddings API
pub struct EmbeddingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    /// Create a service against the OpenAI API with the default model
    pub fn new_openai(api_key: impl Into<String>) -> Self {
        Self::new_custom(
            api_key,
            "https://api.openai.com/v1",
            DEFAULT_EMBEDDING_MODEL,
            DEFAULT_EMBEDDING_DIM,
        )
    }

    /// Create a service against any compatible endpoint
    pub fn new_custom(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Embed a batch of texts, preserving input order
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} text(s) with {}", texts.len(), self.model);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| MemoryError::Embedding(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(MemoryError::Embedding(format!(
                "API returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| MemoryError::Embedding(format!("Failed to parse response: {}", e)))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            if item.embedding.len() != self.dimension {
                return Err(MemoryError::DimensionMismatch {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::Embedding("API returned no embedding".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Build the embedding service from configuration
pub fn create_embedding_service(config: &EmbeddingConfig) -> anyhow::Result<EmbeddingService> {
    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("No embedding API key set (OPENAI_API_KEY)"))?;
    Ok(EmbeddingService::new_custom(
        api_key,
        config.base_url.clone(),
        config.model.clone(),
        config.dimension,
    ))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}
