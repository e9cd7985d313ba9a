//! Feature extraction seam. Extraction is best-effort everywhere: callers
//! swallow errors and proceed with empty features.

use async_trait::async_trait;
use findex_core::{DocumentFeatures, Error, Result};

/// `(title, body) -> keywords/entities/summary/sentiment/category`.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, title: &str, body: &str) -> Result<DocumentFeatures>;
}

/// Extractor that returns empty features. Used when no NLP service is
/// deployed; indexing must work identically without one.
#[derive(Default)]
pub struct NoopFeatureExtractor;

impl NoopFeatureExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureExtractor for NoopFeatureExtractor {
    async fn extract(&self, _title: &str, _body: &str) -> Result<DocumentFeatures> {
        Ok(DocumentFeatures::default())
    }
}

/// Client for an NLP service exposing `POST /extract`.
pub struct HttpFeatureExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFeatureExtractor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FeatureExtractor for HttpFeatureExtractor {
    async fn extract(&self, title: &str, body: &str) -> Result<DocumentFeatures> {
        let url = format!("{}/extract", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "title": title, "body": body }))
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("extract request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Extraction(format!(
                "extract returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("extract response malformed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_returns_empty() {
        let extractor = NoopFeatureExtractor::new();
        let features = extractor.extract("title", "body").await.unwrap();
        assert_eq!(features, DocumentFeatures::default());
    }
}
