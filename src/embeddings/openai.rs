use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Embedder;
use crate::config::EmbeddingsConfig;
use crate::error::{Result, RagrouteError};

const MAX_BATCH_SIZE: usize = 2048;
const MAX_RETRIES: usize = 3;

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
///
/// Splits large inputs into API-sized batches and retries rate-limit and
/// server errors with exponential backoff.
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    model: String,
    batch_size: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder; `batch_size` is capped at 2048.
    pub fn new(api_key: String, model: String, batch_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagrouteError::Embedding(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        })
    }

    /// Build an embedder from `[embeddings]` config, reading the key from its env var.
    pub fn from_config(config: &EmbeddingsConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagrouteError::Config(format!("Environment variable {} not set", config.api_key_env))
        })?;
        Self::new(api_key, config.model.clone(), config.batch_size)
    }

    async fn request_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagrouteError::Embedding(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagrouteError::Embedding(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagrouteError::Embedding(format!("Failed to parse response: {}", e)))?;

        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn request_batch_with_retry(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.request_batch(texts.clone()).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, MAX_RETRIES, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rate limits and 5xx responses are worth another attempt.
fn is_retryable(err: &RagrouteError) -> bool {
    let msg = err.to_string();
    ["429", "500", "502", "503", "504"].iter().any(|code| msg.contains(code))
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = std::time::Instant::now();
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let embeddings = self.request_batch_with_retry(chunk.to_vec()).await?;
            if embeddings.len() != chunk.len() {
                return Err(RagrouteError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    chunk.len(),
                    embeddings.len()
                )));
            }
            all_embeddings.extend(embeddings);

            // Small pause between full batches to stay under rate limits
            if chunk.len() == self.batch_size {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        log::debug!("Embedded {} texts in {:?}", texts.len(), start.elapsed());
        Ok(all_embeddings)
    }
}
