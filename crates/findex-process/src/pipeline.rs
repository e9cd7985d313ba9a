//! Pipeline driver: clean → dedup → assess, then the retention policy.

use std::sync::Arc;

use findex_core::{Document, Error, FindexConfig, RawDocument};
use findex_engines::{DistributedCache, FeatureExtractor};
use serde::Serialize;
use tracing::{debug, info};

use crate::cleaner::Cleaner;
use crate::dedup::Deduplicator;
use crate::quality::QualityAssessor;

/// Outcome of one pipeline run over a batch.
#[derive(Debug, Default, Serialize)]
pub struct PipelineOutcome {
    /// Documents that passed every stage and the retention threshold.
    pub retained: Vec<Document>,
    /// Exact or near duplicates, with `duplicate_of` set.
    pub duplicates: Vec<Document>,
    /// Assessed documents below the quality threshold.
    pub rejected: Vec<Document>,
    /// Deterministic cleaner rejections, one message per bad record.
    pub data_errors: Vec<String>,
}

impl PipelineOutcome {
    pub fn total_in(&self) -> usize {
        self.retained.len() + self.duplicates.len() + self.rejected.len() + self.data_errors.len()
    }
}

/// Drives a batch of raw records through the full processing pipeline.
pub struct DocumentPipeline {
    cleaner: Cleaner,
    deduplicator: Deduplicator,
    assessor: QualityAssessor,
    quality_threshold: f64,
}

impl DocumentPipeline {
    pub fn new(
        config: &FindexConfig,
        cache: Arc<dyn DistributedCache>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Self {
        Self {
            cleaner: Cleaner::new(config, extractor),
            deduplicator: Deduplicator::new(config, cache),
            assessor: QualityAssessor::new(config),
            quality_threshold: config.quality_threshold,
        }
    }

    /// Process a batch of raw records into retained documents.
    pub async fn process(&self, raw_documents: Vec<RawDocument>) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();
        let total = raw_documents.len();

        let mut cleaned = Vec::with_capacity(total);
        for raw in &raw_documents {
            match self.cleaner.clean(raw).await {
                Ok(doc) => cleaned.push(doc),
                Err(Error::Data(message)) => {
                    debug!("Rejected record: {}", message);
                    outcome.data_errors.push(message);
                }
                Err(e) => outcome.data_errors.push(e.to_string()),
            }
        }

        let (unique, duplicates) = self.deduplicator.deduplicate(cleaned).await;
        outcome.duplicates = duplicates;

        for doc in unique {
            let assessed = self.assessor.assess_into(doc);
            if assessed.quality_score() >= self.quality_threshold {
                outcome.retained.push(assessed);
            } else {
                debug!(
                    "Below quality threshold ({:.3}): {}",
                    assessed.quality_score(),
                    assessed.id
                );
                outcome.rejected.push(assessed);
            }
        }

        info!(
            "Pipeline: {} in, {} retained, {} duplicates, {} low-quality, {} data errors",
            total,
            outcome.retained.len(),
            outcome.duplicates.len(),
            outcome.rejected.len(),
            outcome.data_errors.len()
        );
        outcome
    }

    /// Process a single record through clean + assess, skipping dedup.
    /// Used by the incremental path where the change detector has already
    /// established identity.
    pub async fn process_single(&self, raw: &RawDocument) -> findex_core::Result<Document> {
        let doc = self.cleaner.clean(raw).await?;
        Ok(self.assessor.assess_into(doc))
    }

    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_engines::{MemoryCache, NoopFeatureExtractor};

    fn pipeline() -> DocumentPipeline {
        DocumentPipeline::new(
            &FindexConfig::default(),
            Arc::new(MemoryCache::new()),
            Arc::new(NoopFeatureExtractor::new()),
        )
    }

    fn raw(id: &str, title: &str, content: &str) -> RawDocument {
        RawDocument {
            id: Some(id.into()),
            title: title.into(),
            content: content.into(),
            url: format!("https://example.com/{id}"),
            source: "test".into(),
            published_at: Some(chrono::Utc::now()),
            ..Default::default()
        }
    }

    const ARTICLE: &str = "The company reported quarterly results ahead of consensus, \
with revenue of 4.2 billion and margins expanding 150 basis points.\n\
Management raised full-year guidance citing resilient demand. Analysts said the \
earnings forecast implies double-digit growth through 2027, according to the filing.";

    #[tokio::test]
    async fn test_full_pipeline_retains_good_documents() {
        let outcome = pipeline()
            .process(vec![
                raw("a", "Quarterly results beat expectations", ARTICLE),
                raw("b", "Guidance raised after strong demand", &format!("{ARTICLE} More detail.")),
            ])
            .await;

        assert_eq!(outcome.retained.len(), 2);
        assert!(outcome.duplicates.is_empty());
        assert!(outcome.data_errors.is_empty());
        assert!(outcome.retained.iter().all(|d| d.quality.is_some()));
    }

    #[tokio::test]
    async fn test_pipeline_counts_partition_input() {
        let outcome = pipeline()
            .process(vec![
                raw("a", "Quarterly results beat expectations", ARTICLE),
                raw("b", "", ARTICLE), // data error
            ])
            .await;
        assert_eq!(outcome.total_in(), 2);
        assert_eq!(outcome.data_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_drops_duplicates() {
        let outcome = pipeline()
            .process(vec![
                raw("a", "Same story", ARTICLE),
                raw("b", "Same story", ARTICLE),
            ])
            .await;
        assert_eq!(outcome.retained.len() + outcome.rejected.len(), 1);
        assert_eq!(outcome.duplicates.len(), 1);
    }
}
