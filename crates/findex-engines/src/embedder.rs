//! Embedding seam: HTTP embedding service client and a deterministic
//! hash-based fallback.

use async_trait::async_trait;
use findex_core::{Error, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Text → fixed-length vector. How the vector is computed is an external
/// concern; callers only rely on `dimension()`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

/// Truncate or zero-pad a vector to the configured dimension. A mismatch is
/// recoverable and logged, never fatal.
pub fn adjust_dimension(mut vector: Vec<f32>, dimension: usize) -> Vec<f32> {
    if vector.len() != dimension {
        warn!(
            "Embedding dimension mismatch: got {}, expected {}, adjusting",
            vector.len(),
            dimension
        );
        vector.resize(dimension, 0.0);
    }
    vector
}

// ---------------------------------------------------------------
// Deterministic fallback
// ---------------------------------------------------------------

/// Deterministic embedder seeded from the sha256 of the text, L2-normalized.
/// Identical texts map to identical vectors, so exact-duplicate content still
/// clusters; it carries no semantics beyond that. Keeps the pipeline
/// exercisable with no embedding service deployed.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut seed = Sha256::digest(text.as_bytes()).to_vec();
        while values.len() < self.dimension {
            for chunk in seed.chunks_exact(2) {
                if values.len() == self.dimension {
                    break;
                }
                let raw = u16::from_be_bytes([chunk[0], chunk[1]]);
                // Map to [-1, 1]
                values.push(raw as f32 / u16::MAX as f32 * 2.0 - 1.0);
            }
            seed = Sha256::digest(&seed).to_vec();
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ---------------------------------------------------------------
// HTTP embedding service
// ---------------------------------------------------------------

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an embedding service exposing `POST /embed`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            dimension,
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("embed request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Embedding(format!(
                "embed returned {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("embed response malformed: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "embed returned {} vectors for {} texts",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        Ok(parsed
            .embeddings
            .into_iter()
            .map(|v| adjust_dimension(v, self.dimension))
            .collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(std::slice::from_ref(&text.to_string())).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
