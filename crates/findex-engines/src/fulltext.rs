//! Full-text engine seam: Elasticsearch client and in-memory fallback.

use async_trait::async_trait;
use dashmap::DashMap;
use findex_core::{Document, Error, Result};
use tracing::debug;

use crate::types::{EngineHit, FullTextResults, SearchQuery, SortOrder};

/// Narrow interface to the full-text engine. Relevance scores returned by
/// `search` are normalized to [0, 1].
#[async_trait]
pub trait FullTextEngine: Send + Sync {
    async fn index(&self, doc: &Document) -> Result<()>;

    /// Returns true if the document existed. Deleting an unknown id is not
    /// an error.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn search(&self, query: &SearchQuery) -> Result<FullTextResults>;

    /// Reachability probe for health reporting.
    async fn ping(&self) -> bool;
}

// ---------------------------------------------------------------
// In-memory fallback
// ---------------------------------------------------------------

/// In-process full-text engine: term-overlap scoring over stored payloads.
/// Serves as the degraded-mode fallback and the test double.
#[derive(Default)]
pub struct MemoryFullText {
    docs: DashMap<String, serde_json::Value>,
}

impl MemoryFullText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn raw_score(query_terms: &[String], payload: &serde_json::Value) -> f64 {
        let title = payload.get("title").and_then(|v| v.as_str()).unwrap_or("");
        let body = payload.get("body").and_then(|v| v.as_str()).unwrap_or("");
        let title_lower = title.to_lowercase();
        let body_lower = body.to_lowercase();

        let mut score = 0.0;
        for term in query_terms {
            // Title matches weigh double
            score += 2.0 * title_lower.matches(term.as_str()).count() as f64;
            score += body_lower.matches(term.as_str()).count() as f64;
        }
        score
    }
}

#[async_trait]
impl FullTextEngine for MemoryFullText {
    async fn index(&self, doc: &Document) -> Result<()> {
        let payload = serde_json::to_value(doc)?;
        self.docs.insert(doc.id.clone(), payload);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.docs.remove(id).is_some())
    }

    async fn search(&self, query: &SearchQuery) -> Result<FullTextResults> {
        let terms: Vec<String> = query
            .query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();

        let mut scored: Vec<(String, f64, serde_json::Value)> = self
            .docs
            .iter()
            .filter(|entry| query.filters.matches(entry.value()))
            .filter_map(|entry| {
                let score = Self::raw_score(&terms, entry.value());
                (score > 0.0).then(|| (entry.key().clone(), score, entry.value().clone()))
            })
            .collect();

        let total = scored.len() as u64;

        // Normalize to [0, 1] against the best raw score
        let max = scored.iter().map(|(_, s, _)| *s).fold(0.0_f64, f64::max);
        if max > 0.0 {
            for entry in &mut scored {
                entry.1 /= max;
            }
        }

        match query.sort {
            SortOrder::Relevance => {
                scored.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });
            }
            SortOrder::PublishedAt => {
                scored.sort_by(|a, b| {
                    let ta = a.2.get("published_at").and_then(|v| v.as_str()).unwrap_or("");
                    let tb = b.2.get("published_at").and_then(|v| v.as_str()).unwrap_or("");
                    tb.cmp(ta).then_with(|| a.0.cmp(&b.0))
                });
            }
        }

        let start = (query.page.saturating_sub(1)) * query.page_size;
        let hits = scored
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .map(|(id, score, payload)| EngineHit { id, score, payload })
            .collect();

        Ok(FullTextResults { total, hits })
    }

    async fn ping(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------
// Elasticsearch REST client
// ---------------------------------------------------------------

/// Elasticsearch-backed engine talking to the REST API.
pub struct ElasticFullText {
    client: reqwest::Client,
    base_url: String,
    index: String,
}

impl ElasticFullText {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            index: index.into(),
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    fn build_query(&self, query: &SearchQuery) -> serde_json::Value {
        let mut filter = Vec::new();
        if let Some(source) = &query.filters.source {
            filter.push(serde_json::json!({ "term": { "source": source } }));
        }
        if !query.filters.tags.is_empty() {
            filter.push(serde_json::json!({ "terms": { "tags": query.filters.tags } }));
        }
        if query.filters.published_after.is_some() || query.filters.published_before.is_some() {
            let mut range = serde_json::Map::new();
            if let Some(after) = query.filters.published_after {
                range.insert("gte".into(), serde_json::json!(after.to_rfc3339()));
            }
            if let Some(before) = query.filters.published_before {
                range.insert("lte".into(), serde_json::json!(before.to_rfc3339()));
            }
            filter.push(serde_json::json!({ "range": { "published_at": range } }));
        }

        let sort = match query.sort {
            SortOrder::Relevance => serde_json::json!(["_score"]),
            SortOrder::PublishedAt => serde_json::json!([{ "published_at": "desc" }, "_score"]),
        };

        serde_json::json!({
            "from": (query.page.saturating_sub(1)) * query.page_size,
            "size": query.page_size,
            "sort": sort,
            "query": {
                "bool": {
                    "must": {
                        "multi_match": {
                            "query": query.query,
                            "fields": ["title^2", "body", "tags"],
                        }
                    },
                    "filter": filter,
                }
            }
        })
    }
}

#[async_trait]
impl FullTextEngine for ElasticFullText {
    async fn index(&self, doc: &Document) -> Result<()> {
        let response = self
            .client
            .put(self.doc_url(&doc.id))
            .json(doc)
            .send()
            .await
            .map_err(|e| Error::FullText(format!("index request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::FullText(format!(
                "index {} returned {}",
                doc.id,
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.doc_url(id))
            .send()
            .await
            .map_err(|e| Error::FullText(format!("delete request failed: {e}")))?;

        match response.status().as_u16() {
            404 => Ok(false),
            s if (200..300).contains(&s) => Ok(true),
            s => Err(Error::FullText(format!("delete {id} returned {s}"))),
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<FullTextResults> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let body = self.build_query(query);
        debug!("Full-text search: {}", query.query);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::FullText(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::FullText(format!(
                "search returned {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::FullText(format!("search response malformed: {e}")))?;

        let total = parsed
            .pointer("/hits/total/value")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let max_score = parsed
            .pointer("/hits/max_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let hits = parsed
            .pointer("/hits/hits")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|hit| {
                        let id = hit.get("_id")?.as_str()?.to_string();
                        let raw = hit.get("_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        // Normalize against max_score so fusion sees [0, 1]
                        let score = if max_score > 0.0 { raw / max_score } else { 0.0 };
                        let payload = hit.get("_source").cloned().unwrap_or_default();
                        Some(EngineHit { id, score, payload })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(FullTextResults { total, hits })
    }

    async fn ping(&self) -> bool {
        self.client
            .get(&self.base_url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_core::DocumentFeatures;

    fn doc(id: &str, title: &str, body: &str) -> Document {
        Document {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            url: format!("https://example.com/{id}"),
            source: "test".into(),
            published_at: None,
            tags: vec![],
            content_hash: format!("hash-{id}"),
            word_count: body.split_whitespace().count(),
            char_count: body.len(),
            features: DocumentFeatures::default(),
            quality: None,
            embedding: None,
            duplicate_of: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_memory_index_and_search() {
        let engine = MemoryFullText::new();
        engine
            .index(&doc("a", "Quarterly earnings beat", "Revenue grew strongly"))
            .await
            .unwrap();
        engine
            .index(&doc("b", "Weather report", "Sunny with light winds"))
            .await
            .unwrap();

        let results = engine.search(&SearchQuery::new("earnings")).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, "a");
        assert!(results.hits[0].score > 0.0 && results.hits[0].score <= 1.0);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let engine = MemoryFullText::new();
        engine.index(&doc("a", "title", "body")).await.unwrap();
        assert!(engine.delete("a").await.unwrap());
        assert!(!engine.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_pagination() {
        let engine = MemoryFullText::new();
        for i in 0..5 {
            engine
                .index(&doc(&format!("d{i}"), "earnings", "earnings report"))
                .await
                .unwrap();
        }

        let mut query = SearchQuery::new("earnings");
        query.page = 2;
        query.page_size = 2;
        let results = engine.search(&query).await.unwrap();
        assert_eq!(results.total, 5);
        assert_eq!(results.hits.len(), 2);
    }

    #[test]
    fn test_elastic_query_shape() {
        let engine = ElasticFullText::new("http://localhost:9200", "docs");
        let mut query = SearchQuery::new("fed rate decision");
        query.filters.source = Some("reuters".into());
        query.page = 3;
        query.page_size = 10;

        let body = engine.build_query(&query);
        assert_eq!(body["from"], 20);
        assert_eq!(body["size"], 10);
        assert_eq!(
            body["query"]["bool"]["must"]["multi_match"]["query"],
            "fed rate decision"
        );
        assert_eq!(body["query"]["bool"]["filter"][0]["term"]["source"], "reuters");
    }
}
