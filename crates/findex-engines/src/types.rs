//! Shared request/response types for the engine seams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A query against the full-text engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    #[serde(default)]
    pub sort: SortOrder,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: SearchFilters::default(),
            page: 1,
            page_size: 20,
            sort: SortOrder::Relevance,
        }
    }
}

/// Structured filters understood by both engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_before: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.tags.is_empty()
            && self.published_after.is_none()
            && self.published_before.is_none()
    }

    /// Apply the filters against a stored document payload.
    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        if let Some(source) = &self.source {
            if payload.get("source").and_then(|v| v.as_str()) != Some(source.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let doc_tags: Vec<&str> = payload
                .get("tags")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|t| t.as_str()).collect())
                .unwrap_or_default();
            if !self.tags.iter().any(|t| doc_tags.contains(&t.as_str())) {
                return false;
            }
        }
        if self.published_after.is_some() || self.published_before.is_some() {
            let published = payload
                .get("published_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let Some(published) = published else {
                return false;
            };
            if let Some(after) = self.published_after {
                if published < after {
                    return false;
                }
            }
            if let Some(before) = self.published_before {
                if published > before {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    PublishedAt,
}

/// One hit from either engine, scored in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHit {
    pub id: String,
    pub score: f64,
    /// The stored document payload as the engine returned it.
    pub payload: serde_json::Value,
}

/// Full-text search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextResults {
    pub total: u64,
    pub hits: Vec<EngineHit>,
}
