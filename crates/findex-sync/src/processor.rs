//! Incremental processing: pushes a classified change set into the full-text
//! and vector engines, batched, with per-item retry and partial-failure
//! reporting.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use findex_core::{Document, Error, FindexConfig, Result};
use findex_engines::{
    adjust_dimension, Embedder, FullTextEngine, TaskQueue, VectorEngine,
};
use findex_process::QualityAssessor;
use tracing::{debug, info, warn};

use crate::types::{ChangeSet, ProcessingReport};

/// How much of a document feeds the embedding model.
const EMBED_CHAR_LIMIT: usize = 2_000;

/// Drives created/updated/deleted documents into both engines. One call
/// processes its batches sequentially; independent calls (different sources)
/// may run concurrently.
pub struct IncrementalProcessor {
    fulltext: Arc<dyn FullTextEngine>,
    vector: Arc<dyn VectorEngine>,
    embedder: Arc<dyn Embedder>,
    queue: Option<Arc<dyn TaskQueue>>,
    assessor: QualityAssessor,
    quality_threshold: f64,
    batch_size: usize,
    max_retries: usize,
    call_timeout: Duration,
    queue_poll_timeout: Duration,
    vector_dimension: usize,
}

impl IncrementalProcessor {
    pub fn new(
        config: &FindexConfig,
        fulltext: Arc<dyn FullTextEngine>,
        vector: Arc<dyn VectorEngine>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            fulltext,
            vector,
            embedder,
            queue: None,
            assessor: QualityAssessor::new(config),
            quality_threshold: config.quality_threshold,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            queue_poll_timeout: Duration::from_secs(config.queue_poll_timeout_secs),
            vector_dimension: config.vector_dimension,
        }
    }

    /// Attach an optional task queue; work is dispatched there first and
    /// falls back to in-process execution on timeout or failure.
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Process one change set. `documents` maps ids to the current materialized
    /// documents for the created/updated partitions. With `full_processing`,
    /// unassessed documents are quality-scored and low-quality ones skipped;
    /// without it everything is indexed as-is.
    pub async fn process_changes(
        &self,
        changes: &ChangeSet,
        documents: &HashMap<String, Document>,
        full_processing: bool,
    ) -> ProcessingReport {
        if let Some(report) = self
            .try_queue_dispatch(changes, documents, full_processing)
            .await
        {
            return report;
        }
        self.process_locally(changes, documents, full_processing).await
    }

    /// The in-process execution path.
    pub async fn process_locally(
        &self,
        changes: &ChangeSet,
        documents: &HashMap<String, Document>,
        full_processing: bool,
    ) -> ProcessingReport {
        let mut report = ProcessingReport::default();

        self.process_deletes(changes, &mut report).await;
        self.process_upserts(changes, documents, full_processing, &mut report)
            .await;

        info!(
            "Processed changes for {}: {} created, {} updated, {} deleted, {} errors",
            changes.source,
            report.created_ok,
            report.updated_ok,
            report.deleted_ok,
            report.errors.len()
        );
        report
    }

    /// Deletes go to both engines; removal counts as successful if either
    /// engine accepted it (the stores may be transiently inconsistent, and a
    /// missing-in-one-store delete is not an error).
    async fn process_deletes(&self, changes: &ChangeSet, report: &mut ProcessingReport) {
        for entry in &changes.deleted {
            let id = entry.id.as_str();

            let fts = self
                .with_retry("fulltext_delete", || self.fulltext.delete(id))
                .await;
            let vec = self
                .with_retry("vector_delete", || self.vector.delete(id))
                .await;

            match (&fts, &vec) {
                (Err(fe), Err(ve)) => {
                    report.push_error(id, "delete", format!("fulltext: {fe}; vector: {ve}"));
                }
                _ => {
                    report.deleted_ok += 1;
                    if let Ok(true) = fts {
                        report.fulltext_ok += 1;
                    }
                    if let Ok(true) = vec {
                        report.vector_ok += 1;
                    }
                }
            }
        }
    }

    async fn process_upserts(
        &self,
        changes: &ChangeSet,
        documents: &HashMap<String, Document>,
        full_processing: bool,
        report: &mut ProcessingReport,
    ) {
        // Created first, then updated; a single document's own sequence
        // across cycles is preserved by snapshot ordering upstream.
        let work: Vec<(&str, bool)> = changes
            .created
            .iter()
            .map(|e| (e.id.as_str(), true))
            .chain(changes.updated.iter().map(|e| (e.id.as_str(), false)))
            .collect();

        let mut resolved: Vec<(Document, bool)> = Vec::with_capacity(work.len());
        for (id, is_create) in work {
            let Some(doc) = documents.get(id) else {
                report.push_error(id, "resolve", "document missing from batch");
                continue;
            };

            let doc = if full_processing && doc.quality.is_none() {
                self.assessor.assess_into(doc.clone())
            } else {
                doc.clone()
            };

            if full_processing && doc.quality_score() < self.quality_threshold {
                debug!(
                    "Skipping low-quality document {} ({:.3})",
                    doc.id,
                    doc.quality_score()
                );
                report.skipped_low_quality += 1;
                continue;
            }
            resolved.push((doc, is_create));
        }

        for batch in resolved.chunks(self.batch_size) {
            self.process_batch(batch, report).await;
        }
    }

    /// Index one batch: full-text first, then embedding + vector upsert.
    /// A failing item never aborts the batch.
    async fn process_batch(&self, batch: &[(Document, bool)], report: &mut ProcessingReport) {
        for (doc, is_create) in batch {
            match self
                .with_retry("fulltext_index", || self.fulltext.index(doc))
                .await
            {
                Ok(()) => {
                    report.fulltext_ok += 1;
                    if *is_create {
                        report.created_ok += 1;
                    } else {
                        report.updated_ok += 1;
                    }
                }
                Err(e) => {
                    report.push_error(&doc.id, "fulltext_index", e.to_string());
                }
            }

            match self.upsert_vector(doc).await {
                Ok(()) => report.vector_ok += 1,
                Err(e) => report.push_error(&doc.id, "vector_upsert", e.to_string()),
            }
        }
    }

    async fn upsert_vector(&self, doc: &Document) -> Result<()> {
        let vector = match &doc.embedding {
            Some(vector) => vector.clone(),
            None => {
                let text: String = format!("{}\n{}", doc.title, doc.body)
                    .chars()
                    .take(EMBED_CHAR_LIMIT)
                    .collect();
                self.with_retry("embed", || self.embedder.embed(&text)).await?
            }
        };
        let vector = adjust_dimension(vector, self.vector_dimension);

        let payload = vector_payload(doc);
        self.with_retry("vector_upsert", || {
            self.vector.upsert(&doc.id, &vector, &payload)
        })
        .await
    }

    /// Dispatch the whole call to the task queue and poll for the report.
    /// Returns `None` when no queue is configured, enqueueing fails, or the
    /// poll window closes; the caller then runs in-process.
    async fn try_queue_dispatch(
        &self,
        changes: &ChangeSet,
        documents: &HashMap<String, Document>,
        full_processing: bool,
    ) -> Option<ProcessingReport> {
        let queue = self.queue.as_ref()?;

        let payload = serde_json::json!({
            "changes": changes,
            "documents": documents,
            "full_processing": full_processing,
        });

        let job_id = match queue.enqueue("process_changes", payload).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Task queue enqueue failed, running in-process: {e}");
                return None;
            }
        };

        let deadline = tokio::time::Instant::now() + self.queue_poll_timeout;
        loop {
            match queue.fetch_result(&job_id).await {
                Ok(Some(value)) => match serde_json::from_value::<ProcessingReport>(value) {
                    Ok(report) => return Some(report),
                    Err(e) => {
                        warn!("Task queue returned malformed report, running in-process: {e}");
                        return None;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!("Task queue poll failed, running in-process: {e}");
                    return None;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Task queue job {job_id} not completed within {}s, running in-process",
                    self.queue_poll_timeout.as_secs()
                );
                return None;
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// Bounded-timeout retry with doubling backoff. A timeout counts as that
    /// attempt's failure, never as a reason to abort the surrounding batch.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_millis(200);
        let mut last_error = Error::Internal(format!("{operation}: no attempts made"));

        for attempt in 1..=self.max_retries {
            match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = Error::Timeout(self.call_timeout.as_secs()),
            }

            if attempt < self.max_retries {
                debug!(
                    "{operation} attempt {attempt}/{} failed: {last_error}, retrying",
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_error)
    }
}

fn vector_payload(doc: &Document) -> serde_json::Value {
    serde_json::json!({
        "id": doc.id,
        "title": doc.title,
        "url": doc.url,
        "source": doc.source,
        "tags": doc.tags,
        "published_at": doc.published_at.map(|t| t.to_rfc3339()),
        "published_ts": doc.published_at.map(|t| t.timestamp()),
        "quality_score": doc.quality_score(),
    })
}
