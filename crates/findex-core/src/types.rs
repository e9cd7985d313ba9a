//! Data model: raw crawler records and cleaned documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw record as produced by a crawler or a registered source's fetch
/// callback. Type-specific behavior (news vs. announcement) is a function of
/// the `metadata` bag, not a subtype.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDocument {
    /// Externally stable id, if the source provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// A cleaned, retrievable document. Immutable once indexed; updates replace
/// the stored copy wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// sha256 over normalized `title + first 500 body chars + url`.
    pub content_hash: String,
    pub word_count: usize,
    pub char_count: usize,
    #[serde(default)]
    pub features: DocumentFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityAssessment>,
    /// Attached at index time by the incremental processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Set by the deduplicator on the losing side of a collapse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl Document {
    /// Quality score, or 0.0 when the document has not been assessed.
    pub fn quality_score(&self) -> f64 {
        self.quality.as_ref().map(|q| q.score).unwrap_or(0.0)
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

/// Lightweight features attached by the external extractor. All fields stay
/// empty when the extractor is unavailable; indexing proceeds regardless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFeatures {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Result of quality assessment: weighted sub-scores in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub score: f64,
    pub label: QualityLabel,
    pub completeness: f64,
    pub content_quality: f64,
    pub information_value: f64,
    pub spam_score: f64,
    pub structure_quality: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Deterministic threshold mapping over the overall quality score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl QualityLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityLabel::High
        } else if score >= 0.6 {
            QualityLabel::Medium
        } else if score >= 0.4 {
            QualityLabel::Low
        } else {
            QualityLabel::VeryLow
        }
    }
}
