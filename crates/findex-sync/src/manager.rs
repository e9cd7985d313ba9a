//! Sync scheduling: a state machine driving change detection and incremental
//! processing per registered data source.
//!
//! One scheduler task ticks once a minute and never overlaps its own next
//! iteration. Cycles for different sources run concurrently; a given source
//! never has two cycles in flight (atomic in-flight flag with a release-on-
//! drop guard). Stop is cooperative: the loop observes it within one tick and
//! in-flight cycles are awaited, bounded, never killed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use findex_core::{Error, FindexConfig, RawDocument, Result};
use findex_process::DocumentPipeline;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::detector::ChangeDetector;
use crate::processor::IncrementalProcessor;
use crate::types::{
    ChangeLogEntry, ManagerStatus, SourceSyncResult, SyncError, SyncState, SyncStats, SyncStatus,
};

const RECENT_ERROR_LIMIT: usize = 50;

/// Zero-argument fetch returning the latest full batch for a source. How the
/// fetch happens (HTTP crawl, file read, queue poll) is the caller's concern.
pub type FetchCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<RawDocument>>> + Send + Sync>;

struct SourceEntry {
    fetch: FetchCallback,
    state: SyncState,
    in_flight: Arc<AtomicBool>,
}

/// Clears the per-source in-flight flag and the global active-cycle count
/// even when a cycle errors or panics.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>, active: &Arc<AtomicUsize>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        active.fetch_add(1, Ordering::SeqCst);
        Some(Self {
            flag: flag.clone(),
            active: active.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Inner {
    pipeline: Arc<DocumentPipeline>,
    detector: Arc<ChangeDetector>,
    processor: Arc<IncrementalProcessor>,
    sources: DashMap<String, SourceEntry>,
    status_tx: watch::Sender<SyncStatus>,
    stop: Notify,
    stop_requested: AtomicBool,
    stats: Mutex<SyncStats>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    /// Cycles currently in flight across all sources.
    active_cycles: Arc<AtomicUsize>,
    /// Set after a failed cycle; the loop idles until it passes.
    backoff_until: Mutex<Option<tokio::time::Instant>>,
    default_interval_minutes: u64,
    tick: Duration,
    retry_delay: Duration,
    stop_grace: Duration,
}

/// The scheduler: `Idle → Running ⇄ Paused`, `Running/Paused → Stopped`,
/// and `Stopped → Running` on a fresh `start`.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(
        config: &FindexConfig,
        pipeline: Arc<DocumentPipeline>,
        detector: Arc<ChangeDetector>,
        processor: Arc<IncrementalProcessor>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                detector,
                processor,
                sources: DashMap::new(),
                status_tx,
                stop: Notify::new(),
                stop_requested: AtomicBool::new(false),
                stats: Mutex::new(SyncStats::default()),
                loop_handle: Mutex::new(None),
                active_cycles: Arc::new(AtomicUsize::new(0)),
                backoff_until: Mutex::new(None),
                default_interval_minutes: config.sync_interval_minutes,
                tick: Duration::from_secs(60),
                retry_delay: Duration::from_secs(config.sync_retry_delay_secs),
                stop_grace: Duration::from_secs(config.stop_grace_secs),
            }),
        }
    }

    /// Register a data source with its fetch callback.
    pub fn register_source(
        &self,
        name: impl Into<String>,
        fetch: FetchCallback,
        interval_minutes: Option<u64>,
        enabled: bool,
    ) {
        let name = name.into();
        let interval = interval_minutes.unwrap_or(self.inner.default_interval_minutes);
        self.inner.sources.insert(
            name.clone(),
            SourceEntry {
                fetch,
                state: SyncState::new(interval, enabled),
                in_flight: Arc::new(AtomicBool::new(false)),
            },
        );
        info!("Registered source {name} (interval {interval}m, enabled={enabled})");
    }

    pub fn enable_source(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_source(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.inner.sources.get_mut(name) {
            Some(mut entry) => {
                entry.state.enabled = enabled;
                info!("Source {name} enabled={enabled}");
                true
            }
            None => {
                warn!("Unknown source: {name}");
                false
            }
        }
    }

    /// Change a source's sync interval at runtime.
    pub fn set_source_interval(&self, name: &str, interval_minutes: u64) -> bool {
        match self.inner.sources.get_mut(name) {
            Some(mut entry) => {
                entry.state.interval_minutes = interval_minutes;
                entry.state.next_sync_at = entry
                    .state
                    .last_sync_at
                    .map(|t| t + chrono::Duration::minutes(interval_minutes as i64));
                true
            }
            None => false,
        }
    }

    /// Start the scheduler loop. Valid from `Idle` and `Stopped`.
    pub fn start(&self, interval_minutes: Option<u64>, run_immediately: bool) -> Result<()> {
        let current = *self.inner.status_tx.borrow();
        if matches!(current, SyncStatus::Running | SyncStatus::Paused) {
            return Err(Error::Sync(format!("scheduler already active ({current:?})")));
        }

        if let Some(interval) = interval_minutes {
            for mut entry in self.inner.sources.iter_mut() {
                entry.state.interval_minutes = interval;
            }
        }

        self.inner.stop_requested.store(false, Ordering::Release);
        self.inner.status_tx.send_replace(SyncStatus::Running);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            Self::scheduler_loop(inner, run_immediately).await;
        });
        *self.inner.loop_handle.lock() = Some(handle);

        info!("Sync scheduler started (immediate={run_immediately})");
        Ok(())
    }

    /// Pause the loop without killing it. Valid only from `Running`.
    pub fn pause(&self) -> bool {
        let changed = self
            .inner
            .status_tx
            .send_if_modified(|status| match status {
                SyncStatus::Running => {
                    *status = SyncStatus::Paused;
                    true
                }
                _ => false,
            });
        if changed {
            info!("Sync scheduler paused");
        }
        changed
    }

    /// Resume a paused loop.
    pub fn resume(&self) -> bool {
        let changed = self
            .inner
            .status_tx
            .send_if_modified(|status| match status {
                SyncStatus::Paused => {
                    *status = SyncStatus::Running;
                    true
                }
                _ => false,
            });
        if changed {
            info!("Sync scheduler resumed");
        }
        changed
    }

    /// Signal the loop to exit and wait, bounded, for it and any in-flight
    /// cycles to drain. Cycles are never forcibly killed.
    pub async fn stop(&self) -> Result<()> {
        let current = *self.inner.status_tx.borrow();
        if matches!(current, SyncStatus::Idle | SyncStatus::Stopped) {
            return Ok(());
        }

        self.inner.stop_requested.store(true, Ordering::Release);
        self.inner.stop.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.inner.stop_grace;
        let handle = self.inner.loop_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!(
                    "Scheduler did not exit within {}s",
                    self.inner.stop_grace.as_secs()
                );
            }
        }

        while self.inner.active_cycles.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "{} cycle(s) still in flight after {}s; declaring stopped anyway",
                    self.inner.active_cycles.load(Ordering::SeqCst),
                    self.inner.stop_grace.as_secs()
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.inner.status_tx.send_replace(SyncStatus::Stopped);
        info!("Sync scheduler stopped");
        Ok(())
    }

    /// Run sync cycles outside the schedule, even while paused. `force`
    /// ignores the enabled flag; the interval is always ignored. Single-flight
    /// per source still holds: a cycle already in progress is skipped.
    pub async fn trigger_manual_sync(
        &self,
        sources: Option<&[String]>,
        force: bool,
    ) -> HashMap<String, SourceSyncResult> {
        let names: Vec<String> = match sources {
            Some(names) => names
                .iter()
                .filter(|n| self.inner.sources.contains_key(n.as_str()))
                .cloned()
                .collect(),
            None => self.inner.sources.iter().map(|e| e.key().clone()).collect(),
        };

        info!("Manual sync for {} source(s), force={force}", names.len());
        let mut results = HashMap::new();
        for name in names {
            let result = Self::sync_source(&self.inner, &name, force).await;
            results.insert(name, result);
        }
        results
    }

    /// Current status, per-source states, and aggregate stats.
    pub fn status(&self) -> ManagerStatus {
        let sources = self
            .inner
            .sources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state.clone()))
            .collect();
        ManagerStatus {
            status: *self.inner.status_tx.borrow(),
            sources,
            stats: self.inner.stats.lock().clone(),
        }
    }

    /// Observe status transitions; used by the gateway and tests.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Bounded change history for one source, newest first.
    pub async fn change_history(&self, source: &str, limit: usize) -> Vec<ChangeLogEntry> {
        self.inner.detector.history(source, limit).await
    }

    // ---------------------------------------------------------------
    // Scheduler internals
    // ---------------------------------------------------------------

    async fn scheduler_loop(inner: Arc<Inner>, run_immediately: bool) {
        if run_immediately {
            Self::dispatch_due(&inner, true);
        }

        loop {
            tokio::select! {
                _ = inner.stop.notified() => break,
                _ = tokio::time::sleep(inner.tick) => {}
            }
            if inner.stop_requested.load(Ordering::Acquire) {
                break;
            }
            if *inner.status_tx.borrow() != SyncStatus::Running {
                continue;
            }
            // Transient error state: idle through the backoff, then resume
            let backoff = *inner.backoff_until.lock();
            if let Some(until) = backoff {
                if tokio::time::Instant::now() < until {
                    continue;
                }
                *inner.backoff_until.lock() = None;
            }

            Self::dispatch_due(&inner, false);
        }
    }

    /// Spawn one cycle for every due (or, when `ignore_interval`, every
    /// enabled) source. Cycles run off the scheduler task so a slow external
    /// call never delays the next tick's due check; per-source single-flight
    /// prevents overlap.
    fn dispatch_due(inner: &Arc<Inner>, ignore_interval: bool) {
        let now = Utc::now();
        let due: Vec<String> = inner
            .sources
            .iter()
            .filter(|entry| {
                let state = &entry.value().state;
                state.enabled && (ignore_interval || state.is_due(now))
            })
            .map(|entry| entry.key().clone())
            .collect();

        for name in due {
            let inner = inner.clone();
            tokio::spawn(async move {
                let result = Self::sync_source(&inner, &name, false).await;
                if !result.success && !result.skipped {
                    let until = tokio::time::Instant::now() + inner.retry_delay;
                    *inner.backoff_until.lock() = Some(until);
                    warn!(
                        "Cycle for {name} failed; scheduler backing off {}s",
                        inner.retry_delay.as_secs()
                    );
                }
            });
        }
    }

    /// One sync cycle for one source: fetch → pipeline → detect → process,
    /// then the `SyncState` update. All bookkeeping happens here so manual
    /// and scheduled triggers behave identically.
    async fn sync_source(inner: &Arc<Inner>, name: &str, force: bool) -> SourceSyncResult {
        let (fetch, in_flight, enabled) = match inner.sources.get(name) {
            Some(entry) => (
                entry.fetch.clone(),
                entry.in_flight.clone(),
                entry.state.enabled,
            ),
            None => {
                return SourceSyncResult {
                    success: false,
                    processed: 0,
                    error: Some("unknown source".into()),
                    skipped: true,
                }
            }
        };

        if !enabled && !force {
            return SourceSyncResult {
                success: false,
                processed: 0,
                error: Some("source disabled".into()),
                skipped: true,
            };
        }

        let Some(_guard) = InFlightGuard::acquire(&in_flight, &inner.active_cycles) else {
            info!("Cycle already in flight for {name}, skipping");
            return SourceSyncResult {
                success: false,
                processed: 0,
                error: None,
                skipped: true,
            };
        };

        let started = Utc::now();
        let outcome = Self::run_cycle(inner, name, fetch).await;

        inner.stats.lock().total_cycles += 1;
        match outcome {
            Ok(processed) => {
                if let Some(mut entry) = inner.sources.get_mut(name) {
                    let interval = entry.state.interval_minutes as i64;
                    entry.state.last_sync_at = Some(started);
                    entry.state.next_sync_at =
                        Some(started + chrono::Duration::minutes(interval));
                    entry.state.consecutive_error_count = 0;
                    entry.state.total_documents_processed += processed as u64;
                }
                let mut stats = inner.stats.lock();
                stats.successful_cycles += 1;
                stats.total_documents_processed += processed as u64;

                SourceSyncResult {
                    success: true,
                    processed,
                    error: None,
                    skipped: false,
                }
            }
            Err(e) => {
                error!("Sync cycle failed for {name}: {e}");
                if let Some(mut entry) = inner.sources.get_mut(name) {
                    entry.state.consecutive_error_count += 1;
                }
                let mut stats = inner.stats.lock();
                stats.failed_cycles += 1;
                stats.recent_errors.push_back(SyncError {
                    at: Utc::now(),
                    source: name.to_string(),
                    message: e.to_string(),
                });
                while stats.recent_errors.len() > RECENT_ERROR_LIMIT {
                    stats.recent_errors.pop_front();
                }

                SourceSyncResult {
                    success: false,
                    processed: 0,
                    error: Some(e.to_string()),
                    skipped: false,
                }
            }
        }
    }

    async fn run_cycle(inner: &Arc<Inner>, name: &str, fetch: FetchCallback) -> Result<usize> {
        let raw_documents = fetch().await?;
        if raw_documents.is_empty() {
            info!("Source {name} returned no documents");
        }

        let outcome = inner.pipeline.process(raw_documents).await;
        let changes = inner.detector.detect(name, &outcome.retained).await?;

        let documents: HashMap<String, findex_core::Document> = outcome
            .retained
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();
        let report = inner
            .processor
            .process_changes(&changes, &documents, true)
            .await;

        if !report.errors.is_empty() {
            warn!(
                "Cycle for {name}: {} item-level errors (first: {})",
                report.errors.len(),
                report.errors[0].message
            );
        }
        Ok(report.total_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_engines::{
        HashingEmbedder, MemoryCache, MemoryFullText, MemoryVector, NoopFeatureExtractor,
    };
    use std::sync::atomic::AtomicUsize;

    struct Harness {
        manager: SyncManager,
        fulltext: Arc<MemoryFullText>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FindexConfig::default();
        config.state_dir = dir.path().to_path_buf();
        config.max_retries = 1;
        config.call_timeout_secs = 2;
        config.stop_grace_secs = 2;

        let cache = Arc::new(MemoryCache::new());
        let pipeline = Arc::new(DocumentPipeline::new(
            &config,
            cache.clone(),
            Arc::new(NoopFeatureExtractor::new()),
        ));
        let snapshots = Arc::new(crate::SnapshotStore::new(&config, cache));
        let detector = Arc::new(ChangeDetector::new(snapshots, config.change_history_limit));
        let fulltext = Arc::new(MemoryFullText::new());
        let processor = Arc::new(IncrementalProcessor::new(
            &config,
            fulltext.clone(),
            Arc::new(MemoryVector::new()),
            Arc::new(HashingEmbedder::new(384)),
        ));

        Harness {
            manager: SyncManager::new(&config, pipeline, detector, processor),
            fulltext,
            _dir: dir,
        }
    }

    const ARTICLE: &str = "The company reported quarterly results ahead of consensus, \
with revenue of 4.2 billion and margins expanding 150 basis points.\n\
Management raised full-year guidance citing resilient demand. Analysts said the \
earnings forecast implies double-digit growth through 2027, according to the filing.";

    fn raw(id: &str, title: &str) -> RawDocument {
        RawDocument {
            id: Some(id.into()),
            title: title.into(),
            content: ARTICLE.into(),
            url: format!("https://example.com/{id}"),
            source: "news".into(),
            published_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn fetch_of(raws: Vec<RawDocument>) -> FetchCallback {
        Arc::new(move || {
            let raws = raws.clone();
            Box::pin(async move { Ok(raws) })
        })
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let h = harness();
        assert_eq!(h.manager.status().status, SyncStatus::Idle);

        h.manager.start(None, false).unwrap();
        assert_eq!(h.manager.status().status, SyncStatus::Running);

        // Double start is rejected
        assert!(h.manager.start(None, false).is_err());

        assert!(h.manager.pause());
        assert_eq!(h.manager.status().status, SyncStatus::Paused);
        assert!(!h.manager.pause());

        assert!(h.manager.resume());
        assert_eq!(h.manager.status().status, SyncStatus::Running);

        h.manager.stop().await.unwrap();
        assert_eq!(h.manager.status().status, SyncStatus::Stopped);

        // Stopped is terminal until a fresh start
        h.manager.start(None, false).unwrap();
        assert_eq!(h.manager.status().status, SyncStatus::Running);
        h.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_manual_sync_end_to_end() {
        let h = harness();
        h.manager.register_source(
            "news",
            fetch_of(vec![raw("a", "First article headline"), raw("b", "Second article headline")]),
            Some(30),
            true,
        );

        let results = h.manager.trigger_manual_sync(None, false).await;
        let result = &results["news"];
        assert!(result.success);
        assert_eq!(result.processed, 2);
        assert_eq!(h.fulltext.len(), 2);

        let status = h.manager.status();
        let state = &status.sources["news"];
        assert!(state.last_sync_at.is_some());
        assert!(state.next_sync_at.is_some());
        assert_eq!(state.consecutive_error_count, 0);
        assert_eq!(state.total_documents_processed, 2);
    }

    #[tokio::test]
    async fn test_second_sync_sees_unchanged() {
        let h = harness();
        let batch = vec![raw("a", "First article headline"), raw("b", "Second article headline")];
        h.manager
            .register_source("news", fetch_of(batch), Some(30), true);

        h.manager.trigger_manual_sync(None, false).await;
        let results = h.manager.trigger_manual_sync(None, false).await;

        // Everything unchanged: cycle succeeds with zero index writes
        assert!(results["news"].success);
        assert_eq!(results["news"].processed, 0);

        let history = h.manager.change_history("news", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].unchanged, 2);
        assert_eq!(history[0].created, 0);
    }

    #[tokio::test]
    async fn test_single_flight_per_source() {
        let h = harness();

        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let concurrent_cb = concurrent.clone();
        let peak_cb = peak.clone();

        let fetch: FetchCallback = Arc::new(move || {
            let concurrent = concurrent_cb.clone();
            let peak = peak_cb.clone();
            Box::pin(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![raw("a", "First article headline")])
            })
        });
        h.manager.register_source("news", fetch, Some(30), true);

        let (first, second) = tokio::join!(
            h.manager.trigger_manual_sync(None, true),
            h.manager.trigger_manual_sync(None, true),
        );

        // At most one cycle in flight; the loser was skipped, not run
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        let skipped = first["news"].skipped as usize + second["news"].skipped as usize;
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_disabled_source_needs_force() {
        let h = harness();
        h.manager.register_source(
            "news",
            fetch_of(vec![raw("a", "First article headline")]),
            Some(30),
            false,
        );

        let results = h.manager.trigger_manual_sync(None, false).await;
        assert!(results["news"].skipped);
        assert_eq!(h.fulltext.len(), 0);

        let results = h.manager.trigger_manual_sync(None, true).await;
        assert!(results["news"].success);
        assert_eq!(h.fulltext.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_recorded_loop_survives() {
        let h = harness();
        let fetch: FetchCallback = Arc::new(|| {
            Box::pin(async { Err(Error::Sync("source unreachable".into())) })
        });
        h.manager.register_source("flaky", fetch, Some(30), true);

        let results = h.manager.trigger_manual_sync(None, false).await;
        assert!(!results["flaky"].success);

        let status = h.manager.status();
        assert_eq!(status.sources["flaky"].consecutive_error_count, 1);
        assert_eq!(status.stats.failed_cycles, 1);
        assert_eq!(status.stats.recent_errors.len(), 1);

        // Errors are recorded, never fatal: another trigger still works
        let results = h.manager.trigger_manual_sync(None, false).await;
        assert!(!results["flaky"].success);
        assert_eq!(h.manager.status().sources["flaky"].consecutive_error_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_immediately_and_stops() {
        let h = harness();
        h.manager.register_source(
            "news",
            fetch_of(vec![raw("a", "First article headline")]),
            Some(30),
            true,
        );

        h.manager.start(None, true).unwrap();

        // Let the immediate cycle run
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if h.manager.status().sources["news"].last_sync_at.is_some() {
                break;
            }
        }
        assert!(h.manager.status().sources["news"].last_sync_at.is_some());
        assert_eq!(h.fulltext.len(), 1);

        h.manager.stop().await.unwrap();
        assert_eq!(h.manager.status().status, SyncStatus::Stopped);
    }

    #[tokio::test]
    async fn test_manual_sync_works_while_paused() {
        let h = harness();
        h.manager.register_source(
            "news",
            fetch_of(vec![raw("a", "First article headline")]),
            Some(30),
            true,
        );
        h.manager.start(None, false).unwrap();
        h.manager.pause();

        let results = h.manager.trigger_manual_sync(None, false).await;
        assert!(results["news"].success);

        h.manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_reconfiguration() {
        let h = harness();
        h.manager
            .register_source("news", fetch_of(vec![]), Some(30), true);
        assert!(h.manager.set_source_interval("news", 5));
        assert_eq!(h.manager.status().sources["news"].interval_minutes, 5);
        assert!(!h.manager.set_source_interval("ghost", 5));
    }
}
