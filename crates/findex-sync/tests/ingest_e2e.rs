//! End-to-end: raw records through cleaning, dedup, quality, change
//! detection, and incremental indexing, twice.

use std::collections::HashMap;
use std::sync::Arc;

use findex_core::{FindexConfig, RawDocument};
use findex_engines::{
    HashingEmbedder, MemoryCache, MemoryFullText, MemoryVector, NoopFeatureExtractor,
};
use findex_process::DocumentPipeline;
use findex_sync::{ChangeDetector, IncrementalProcessor, SnapshotStore};

struct Stack {
    pipeline: DocumentPipeline,
    detector: ChangeDetector,
    processor: IncrementalProcessor,
    fulltext: Arc<MemoryFullText>,
    vector: Arc<MemoryVector>,
    _dir: tempfile::TempDir,
}

fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let mut config = FindexConfig::default();
    config.state_dir = dir.path().to_path_buf();
    config.max_retries = 1;
    config.call_timeout_secs = 2;

    let cache = Arc::new(MemoryCache::new());
    let fulltext = Arc::new(MemoryFullText::new());
    let vector = Arc::new(MemoryVector::new());

    Stack {
        pipeline: DocumentPipeline::new(
            &config,
            cache.clone(),
            Arc::new(NoopFeatureExtractor::new()),
        ),
        detector: ChangeDetector::new(
            Arc::new(SnapshotStore::new(&config, cache)),
            config.change_history_limit,
        ),
        processor: IncrementalProcessor::new(
            &config,
            fulltext.clone(),
            vector.clone(),
            Arc::new(HashingEmbedder::new(384)),
        ),
        fulltext,
        vector,
        _dir: dir,
    }
}

const EARNINGS: &str = "The company reported quarterly results ahead of consensus, \
with revenue of 4.2 billion and margins expanding 150 basis points.\n\
Management raised full-year guidance citing resilient demand. Analysts said the \
earnings forecast implies double-digit growth through 2027, according to the filing.";

const ENERGY: &str = "Crude futures climbed 3.1 percent after an unplanned outage removed \
roughly 400,000 barrels per day from the market.\n\
Traders said inventories at the hub fell for a fifth straight week, and the forward \
curve moved deeper into backwardation as refiners bid for prompt supply.";

const LAYOFFS: &str = "Three large software vendors announced workforce reductions totaling \
9,000 roles, about 6 percent of their combined headcount.\n\
Executives pointed to slowing enterprise bookings and longer sales cycles, while \
reiterating annual operating margin targets of 28 percent for the fiscal year.";

const PROMO: &str = "Buy now buy now buy now buy now buy now buy now buy now buy now \
buy now buy now buy now buy now buy now buy now buy now buy now buy now buy now \
buy now buy now!!! Click here act now AMAZINGOPPORTUNITY wowwwwwww";

fn raw(id: &str, title: &str, content: &str) -> RawDocument {
    RawDocument {
        id: Some(id.into()),
        title: title.into(),
        content: content.into(),
        url: format!("https://news.example.com/{id}"),
        source: "news".into(),
        published_at: Some(chrono::Utc::now()),
        ..Default::default()
    }
}

fn five_documents() -> Vec<RawDocument> {
    // #4 is a near-duplicate of #1 at three times the word count; #5 is junk
    let mut promo = raw("doc-5", "Unmissable stock offer", PROMO);
    promo.published_at = None;
    vec![
        raw("doc-1", "Quarterly results beat expectations", EARNINGS),
        raw("doc-2", "Oil rallies on supply outage", ENERGY),
        raw("doc-3", "Software vendors cut 9,000 jobs", LAYOFFS),
        raw(
            "doc-4",
            "Quarterly results beat expectations",
            &format!("{EARNINGS}\n{EARNINGS}\n{EARNINGS}"),
        ),
        promo,
    ]
}

#[tokio::test]
async fn test_ingest_dedup_quality_and_incremental_unchanged() {
    let stack = stack();

    // First ingestion
    let outcome = stack.pipeline.process(five_documents()).await;

    let retained: Vec<&str> = outcome.retained.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(outcome.retained.len(), 3);
    assert!(retained.contains(&"doc-2"));
    assert!(retained.contains(&"doc-3"));
    // Higher word count wins the near-duplicate collapse
    assert!(retained.contains(&"doc-4"));

    assert_eq!(outcome.duplicates.len(), 1);
    assert_eq!(outcome.duplicates[0].id, "doc-1");
    assert_eq!(outcome.duplicates[0].duplicate_of.as_deref(), Some("doc-4"));

    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].id, "doc-5");
    assert!(outcome.rejected[0].quality_score() < 0.6);

    let changes = stack
        .detector
        .detect("news", &outcome.retained)
        .await
        .unwrap();
    assert_eq!(changes.created.len(), 3);
    assert_eq!(changes.total_changes(), 3);

    let documents: HashMap<_, _> = outcome
        .retained
        .iter()
        .map(|d| (d.id.clone(), d.clone()))
        .collect();
    let report = stack
        .processor
        .process_changes(&changes, &documents, true)
        .await;
    assert_eq!(report.created_ok, 3);
    assert!(report.errors.is_empty());
    assert_eq!(stack.fulltext.len(), 3);
    assert_eq!(stack.vector.len(), 3);

    // Second ingestion of the same five documents, unchanged
    let outcome = stack.pipeline.process(five_documents()).await;
    assert_eq!(outcome.retained.len(), 3);

    let changes = stack
        .detector
        .detect("news", &outcome.retained)
        .await
        .unwrap();
    assert_eq!(changes.unchanged.len(), 3);
    assert_eq!(changes.total_changes(), 0);

    let documents: HashMap<_, _> = outcome
        .retained
        .iter()
        .map(|d| (d.id.clone(), d.clone()))
        .collect();
    let report = stack
        .processor
        .process_changes(&changes, &documents, true)
        .await;

    // Zero index writes the second time around
    assert_eq!(report.total_ok(), 0);
    assert_eq!(report.fulltext_ok, 0);
    assert_eq!(report.vector_ok, 0);
    assert_eq!(stack.fulltext.len(), 3);
}

#[tokio::test]
async fn test_removed_document_deleted_from_both_engines() {
    let stack = stack();

    let outcome = stack.pipeline.process(five_documents()).await;
    let changes = stack
        .detector
        .detect("news", &outcome.retained)
        .await
        .unwrap();
    let documents: HashMap<_, _> = outcome
        .retained
        .iter()
        .map(|d| (d.id.clone(), d.clone()))
        .collect();
    stack
        .processor
        .process_changes(&changes, &documents, true)
        .await;
    assert_eq!(stack.fulltext.len(), 3);

    // The energy story drops out of the feed
    let next: Vec<RawDocument> = five_documents()
        .into_iter()
        .filter(|r| r.id.as_deref() != Some("doc-2"))
        .collect();
    let outcome = stack.pipeline.process(next).await;
    let changes = stack
        .detector
        .detect("news", &outcome.retained)
        .await
        .unwrap();
    assert_eq!(changes.deleted.len(), 1);
    assert_eq!(changes.deleted[0].id, "doc-2");
    assert_eq!(changes.unchanged.len(), 2);

    let documents: HashMap<_, _> = outcome
        .retained
        .iter()
        .map(|d| (d.id.clone(), d.clone()))
        .collect();
    let report = stack
        .processor
        .process_changes(&changes, &documents, true)
        .await;
    assert_eq!(report.deleted_ok, 1);
    assert_eq!(stack.fulltext.len(), 2);
    assert_eq!(stack.vector.len(), 2);
}
