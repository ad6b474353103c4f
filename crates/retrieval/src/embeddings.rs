//! Text embeddings
//!
//! The embedder is an external HTTP service; this module provides the trait
//! seam, an OpenAI-compatible client, and a deterministic in-process embedder
//! for tests and embedder-less development.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use parley_config::EmbedderConfig;

use crate::RetrievalError;

/// Batch text-to-vector backend
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed a batch of strings into unit-normalized vectors
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Client for OpenAI-compatible `/embeddings` endpoints
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbedderConfig) -> Result<Self, RetrievalError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.trim().is_empty() {
            let auth = format!("Bearer {}", config.api_key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| RetrievalError::Embedding("invalid API key".to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    async fn embed_one_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: Some(self.dimension),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RetrievalError::Embedding(format!(
                "embedding request failed ({status}): {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != inputs.len() {
            return Err(RetrievalError::Embedding(format!(
                "backend returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }

        Ok(parsed
            .data
            .into_iter()
            .map(|entry| normalize(entry.embedding))
            .collect())
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_one_batch(batch).await?;
            for embedding in &embeddings {
                if embedding.len() != self.dimension {
                    return Err(RetrievalError::Embedding(format!(
                        "dimension mismatch: expected {}, got {}",
                        self.dimension,
                        embedding.len()
                    )));
                }
            }
            all.extend(embeddings);
        }
        Ok(all)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn classify_transport_error(err: reqwest::Error) -> RetrievalError {
    if err.is_timeout() {
        RetrievalError::Timeout(format!("embedding backend: {err}"))
    } else {
        RetrievalError::Embedding(err.to_string())
    }
}

/// Scale a vector to unit length; zero vectors pass through unchanged.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Deterministic embedder requiring no model or network
///
/// Buckets character trigrams into a fixed-dimension histogram and
/// normalizes. Texts sharing vocabulary land near each other, which is all
/// the retrieval tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut v = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3.min(chars.len()).max(1)) {
                let mut hasher = DefaultHasher::new();
                window.hash(&mut hasher);
                let idx = (hasher.finish() as usize) % self.dimension;
                v[idx] += 1.0;
            }
        }
        normalize(v)
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_is_unit_normalized() {
        let embedder = HashEmbedder::new(256);
        let out = embedder
            .embed(&["The quick brown fox".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 256);

        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(128);
        let a = embedder.embed(&["same text".to_string()]).await.unwrap();
        let b = embedder.embed(&["same text".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_tracks_vocabulary() {
        let embedder = HashEmbedder::new(512);
        let out = embedder
            .embed(&[
                "decline of the metropolis".to_string(),
                "the metropolis and its decline".to_string(),
                "recipe for lemon cake".to_string(),
            ])
            .await
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        let close = dot(&out[0], &out[1]);
        let far = dot(&out[0], &out[2]);
        assert!(close > far);
    }

    #[test]
    fn test_normalize_zero_vector() {
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let embedder = HashEmbedder::new(64);
        assert!(embedder.embed(&[]).await.unwrap().is_empty());
    }
}
