//! Vector engine seam: Qdrant client and in-memory fallback.

use async_trait::async_trait;
use dashmap::DashMap;
use findex_core::{Error, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{EngineHit, SearchFilters};

/// Narrow interface to the vector engine. Similarity scores are cosine,
/// already in [0, 1] for normalized embeddings.
#[async_trait]
pub trait VectorEngine: Send + Sync {
    async fn upsert(&self, id: &str, vector: &[f32], payload: &serde_json::Value) -> Result<()>;

    /// Returns true if the point existed. Deleting an unknown id is not an
    /// error.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn search_similar(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<EngineHit>>;

    async fn ping(&self) -> bool;
}

/// Cosine similarity between two dense vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------
// In-memory fallback
// ---------------------------------------------------------------

/// In-process vector store with exact cosine search.
#[derive(Default)]
pub struct MemoryVector {
    points: DashMap<String, (Vec<f32>, serde_json::Value)>,
}

impl MemoryVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl VectorEngine for MemoryVector {
    async fn upsert(&self, id: &str, vector: &[f32], payload: &serde_json::Value) -> Result<()> {
        self.points
            .insert(id.to_string(), (vector.to_vec(), payload.clone()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.points.remove(id).is_some())
    }

    async fn search_similar(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<EngineHit>> {
        let mut hits: Vec<EngineHit> = self
            .points
            .iter()
            .filter(|entry| filters.matches(&entry.value().1))
            .filter_map(|entry| {
                let score = cosine_similarity(vector, &entry.value().0);
                (score >= score_threshold).then(|| EngineHit {
                    id: entry.key().clone(),
                    score,
                    payload: entry.value().1.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn ping(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------
// Qdrant REST client
// ---------------------------------------------------------------

/// Qdrant-backed engine talking to the REST API. Point ids are u64s derived
/// from the document id; the original id travels in the payload.
pub struct QdrantVector {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl QdrantVector {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
            dimension,
        }
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = serde_json::json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Vector(format!("create collection failed: {e}")))?;

        // Conflict means it already exists
        if response.status().is_success() || response.status().as_u16() == 409 {
            Ok(())
        } else {
            Err(Error::Vector(format!(
                "create collection returned {}",
                response.status()
            )))
        }
    }

    /// Stable numeric point id for a document id.
    fn point_id(id: &str) -> u64 {
        let digest = Sha256::digest(id.as_bytes());
        u64::from_be_bytes(digest[..8].try_into().unwrap_or([0u8; 8]))
    }

    fn build_filter(filters: &SearchFilters) -> Option<serde_json::Value> {
        if filters.is_empty() {
            return None;
        }
        let mut must = Vec::new();
        if let Some(source) = &filters.source {
            must.push(serde_json::json!({ "key": "source", "match": { "value": source } }));
        }
        if !filters.tags.is_empty() {
            must.push(serde_json::json!({ "key": "tags", "match": { "any": filters.tags } }));
        }
        if filters.published_after.is_some() || filters.published_before.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(after) = filters.published_after {
                range.insert("gte".into(), serde_json::json!(after.timestamp()));
            }
            if let Some(before) = filters.published_before {
                range.insert("lte".into(), serde_json::json!(before.timestamp()));
            }
            must.push(serde_json::json!({ "key": "published_ts", "range": range }));
        }
        Some(serde_json::json!({ "must": must }))
    }
}

#[async_trait]
impl VectorEngine for QdrantVector {
    async fn upsert(&self, id: &str, vector: &[f32], payload: &serde_json::Value) -> Result<()> {
        let url = format!("{}/collections/{}/points", self.base_url, self.collection);
        let mut payload = payload.clone();
        if let Some(map) = payload.as_object_mut() {
            map.insert("id".into(), serde_json::json!(id));
        }
        let body = serde_json::json!({
            "points": [{
                "id": Self::point_id(id),
                "vector": vector,
                "payload": payload,
            }]
        });

        let response = self
            .client
            .put(&url)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Vector(format!("upsert request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Vector(format!(
                "upsert {id} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let url = format!(
            "{}/collections/{}/points/delete",
            self.base_url, self.collection
        );
        let body = serde_json::json!({ "points": [Self::point_id(id)] });

        let response = self
            .client
            .post(&url)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Vector(format!("delete request failed: {e}")))?;

        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(Error::Vector(format!("delete {id} returned {s}"))),
        }
    }

    async fn search_similar(
        &self,
        vector: &[f32],
        filters: &SearchFilters,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<EngineHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let mut body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        if let Some(filter) = Self::build_filter(filters) {
            body["filter"] = filter;
        }
        debug!("Vector search: limit={limit}, threshold={score_threshold}");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Vector(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Vector(format!(
                "search returned {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Vector(format!("search response malformed: {e}")))?;

        let hits = parsed
            .get("result")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|point| {
                        let payload = point.get("payload").cloned().unwrap_or_default();
                        // Prefer the document id stored in the payload
                        let id = payload
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string())
                            .or_else(|| point.get("id").map(|v| v.to_string()))?;
                        let score = point.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        Some(EngineHit { id, score, payload })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(hits)
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/collections", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_upsert_search() {
        let engine = MemoryVector::new();
        engine
            .upsert("a", &[1.0, 0.0], &serde_json::json!({"source": "test"}))
            .await
            .unwrap();
        engine
            .upsert("b", &[0.0, 1.0], &serde_json::json!({"source": "test"}))
            .await
            .unwrap();

        let hits = engine
            .search_similar(&[1.0, 0.1], &SearchFilters::default(), 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_memory_threshold_and_limit() {
        let engine = MemoryVector::new();
        for i in 0..4 {
            let angle = i as f32 * 0.2;
            engine
                .upsert(
                    &format!("p{i}"),
                    &[angle.cos(), angle.sin()],
                    &serde_json::json!({}),
                )
                .await
                .unwrap();
        }

        let hits = engine
            .search_similar(&[1.0, 0.0], &SearchFilters::default(), 2, 0.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_memory_delete_missing() {
        let engine = MemoryVector::new();
        assert!(!engine.delete("nope").await.unwrap());
    }

    #[test]
    fn test_point_id_stable() {
        assert_eq!(QdrantVector::point_id("doc-1"), QdrantVector::point_id("doc-1"));
        assert_ne!(QdrantVector::point_id("doc-1"), QdrantVector::point_id("doc-2"));
    }
}
