//! Configuration, read from the environment with defaults matching the
//! production deployment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level Findex configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindexConfig {
    /// HTTP gateway port.
    pub port: u16,
    /// Elasticsearch base URL, if a full-text engine is deployed.
    pub elasticsearch_url: Option<String>,
    /// Qdrant base URL, if a vector engine is deployed.
    pub qdrant_url: Option<String>,
    /// Redis URL for the distributed cache.
    pub redis_url: Option<String>,
    /// Embedding service URL; absent means the hash fallback embedder.
    pub embedder_url: Option<String>,
    /// Full-text index name.
    pub fulltext_index: String,
    /// Vector collection name.
    pub vector_collection: String,
    /// Embedding dimension; wrong-sized vectors are adjusted to this.
    pub vector_dimension: usize,
    /// Directory for the local snapshot mirror.
    pub state_dir: PathBuf,
    /// Processing batch size for index/upsert operations.
    pub batch_size: usize,
    /// Minimum body word count; shorter documents are rejected.
    pub min_word_count: usize,
    /// Maximum body word count after truncation.
    pub max_word_count: usize,
    /// Hard character cap applied before word-level truncation.
    pub max_content_chars: usize,
    /// Cosine similarity at or above which two documents collapse to one.
    pub similarity_threshold: f64,
    /// Documents below this quality score are not indexed.
    pub quality_threshold: f64,
    /// Fingerprint and snapshot TTL in the cache, seconds.
    pub cache_ttl_secs: u64,
    /// Change-history entries kept per source.
    pub change_history_limit: usize,
    /// Default per-source sync interval, minutes.
    pub sync_interval_minutes: u64,
    /// Delay before the scheduler resumes after a cycle error, seconds.
    pub sync_retry_delay_secs: u64,
    /// Bounded wait for the scheduler task on stop, seconds.
    pub stop_grace_secs: u64,
    /// Per external call timeout, seconds.
    pub call_timeout_secs: u64,
    /// Retry attempts for transient external-call failures.
    pub max_retries: usize,
    /// Wait budget for task-queue results before the sync fallback, seconds.
    pub queue_poll_timeout_secs: u64,
    /// Full-text score weight in hybrid fusion.
    pub fusion_fulltext_weight: f64,
    /// Vector score weight in hybrid fusion.
    pub fusion_vector_weight: f64,
    /// Minimum cosine score requested from the vector engine.
    pub vector_score_threshold: f64,
}

impl Default for FindexConfig {
    fn default() -> Self {
        Self {
            port: 8600,
            elasticsearch_url: None,
            qdrant_url: None,
            redis_url: None,
            embedder_url: None,
            fulltext_index: "findex_documents".into(),
            vector_collection: "findex_documents".into(),
            vector_dimension: 384,
            state_dir: PathBuf::from("data/sync"),
            batch_size: 32,
            min_word_count: 10,
            max_word_count: 10_000,
            max_content_chars: 50_000,
            similarity_threshold: 0.85,
            quality_threshold: 0.6,
            cache_ttl_secs: 30 * 24 * 3600,
            change_history_limit: 100,
            sync_interval_minutes: 30,
            sync_retry_delay_secs: 60,
            stop_grace_secs: 30,
            call_timeout_secs: 10,
            max_retries: 3,
            queue_poll_timeout_secs: 300,
            fusion_fulltext_weight: 0.6,
            fusion_vector_weight: 0.4,
            vector_score_threshold: 0.3,
        }
    }
}

impl FindexConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(port) = env_parse("FINDEX_PORT") {
            config.port = port;
        }
        config.elasticsearch_url = env_string("ELASTICSEARCH_URL");
        config.qdrant_url = env_string("QDRANT_URL");
        config.redis_url = env_string("REDIS_URL");
        config.embedder_url = env_string("EMBEDDER_URL");
        if let Some(index) = env_string("FINDEX_FULLTEXT_INDEX") {
            config.fulltext_index = index;
        }
        if let Some(collection) = env_string("FINDEX_VECTOR_COLLECTION") {
            config.vector_collection = collection;
        }
        if let Some(dim) = env_parse("FINDEX_VECTOR_DIMENSION") {
            config.vector_dimension = dim;
        }
        if let Some(dir) = env_string("FINDEX_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(batch) = env_parse("FINDEX_BATCH_SIZE") {
            config.batch_size = batch;
        }
        if let Some(threshold) = env_parse("FINDEX_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = threshold;
        }
        if let Some(threshold) = env_parse("FINDEX_QUALITY_THRESHOLD") {
            config.quality_threshold = threshold;
        }
        if let Some(minutes) = env_parse("FINDEX_SYNC_INTERVAL_MINUTES") {
            config.sync_interval_minutes = minutes;
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FindexConfig::default();
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.quality_threshold, 0.6);
        assert_eq!(config.fusion_fulltext_weight, 0.6);
        assert_eq!(config.fusion_vector_weight, 0.4);
        assert_eq!(config.change_history_limit, 100);
    }
}
