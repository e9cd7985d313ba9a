//! Types for snapshots, change sets, processing reports, and sync state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-document fragment of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub content_hash: String,
    pub timestamp: DateTime<Utc>,
    pub source_url: String,
}

/// One change-log record: counts only, never document bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ChangeLogEntry {
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// The durable record of what one source's corpus looked like last cycle.
/// Snapshot entries and the bounded change history travel as one value, so a
/// commit replaces both or neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotState {
    pub cycle: u64,
    pub entries: HashMap<String, SnapshotEntry>,
    #[serde(default)]
    pub history: VecDeque<ChangeLogEntry>,
}

impl SnapshotState {
    /// A state is trustworthy only when its newest history entry agrees with
    /// its own cycle number. A fresh state (cycle 0, no history) is valid.
    pub fn is_consistent(&self) -> bool {
        match self.history.back() {
            Some(latest) => latest.cycle == self.cycle,
            None => self.cycle == 0,
        }
    }
}

/// One entry of a change set, carrying the snapshot fragments on both sides
/// where they exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<SnapshotEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<SnapshotEntry>,
}

/// Output of one detection cycle: four disjoint partitions whose ids cover
/// the union of the previous and current snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub source: String,
    pub cycle: u64,
    pub created: Vec<ChangeEntry>,
    pub updated: Vec<ChangeEntry>,
    pub deleted: Vec<ChangeEntry>,
    pub unchanged: Vec<ChangeEntry>,
}

impl ChangeSet {
    pub fn total_changes(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn summary(&self) -> ChangeLogEntry {
        ChangeLogEntry {
            cycle: self.cycle,
            timestamp: Utc::now(),
            created: self.created.len(),
            updated: self.updated.len(),
            deleted: self.deleted.len(),
            unchanged: self.unchanged.len(),
        }
    }
}

/// One failed item inside a processing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub id: String,
    pub operation: String,
    pub message: String,
}

/// Aggregated outcome of one `process_changes` call. `created_ok` and
/// `updated_ok` count documents searchable in the full-text engine;
/// `vector_ok` counts successful vector upserts separately since the two
/// stores may be transiently inconsistent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub created_ok: usize,
    pub updated_ok: usize,
    pub deleted_ok: usize,
    pub fulltext_ok: usize,
    pub vector_ok: usize,
    pub skipped_low_quality: usize,
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

impl ProcessingReport {
    pub fn total_ok(&self) -> usize {
        self.created_ok + self.updated_ok + self.deleted_ok
    }

    pub fn push_error(&mut self, id: &str, operation: &str, message: impl Into<String>) {
        self.errors.push(ItemError {
            id: id.to_string(),
            operation: operation.to_string(),
            message: message.into(),
        });
    }
}

/// Scheduler state machine. `Error` is transient and never a resting state,
/// so it is not part of this enum; errors live in [`SyncStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// Per-source scheduling record. Mutated only by the scheduler loop and the
/// explicit configure operations; a source never has two cycles in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub enabled: bool,
    pub interval_minutes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_sync_at: Option<DateTime<Utc>>,
    pub consecutive_error_count: u32,
    pub total_documents_processed: u64,
}

impl SyncState {
    pub fn new(interval_minutes: u64, enabled: bool) -> Self {
        Self {
            enabled,
            interval_minutes,
            last_sync_at: None,
            next_sync_at: None,
            consecutive_error_count: 0,
            total_documents_processed: 0,
        }
    }

    /// A source is due when it has never synced or its interval has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync_at {
            Some(last) => now - last >= chrono::Duration::minutes(self.interval_minutes as i64),
            None => true,
        }
    }
}

/// One recorded scheduler error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub at: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub total_documents_processed: u64,
    #[serde(default)]
    pub recent_errors: VecDeque<SyncError>,
}

/// Result of a manual sync for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSyncResult {
    pub success: bool,
    pub processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub skipped: bool,
}

/// Snapshot of the manager for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub status: SyncStatus,
    pub sources: HashMap<String, SyncState>,
    pub stats: SyncStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_consistency() {
        let mut state = SnapshotState::default();
        assert!(state.is_consistent());

        state.cycle = 3;
        assert!(!state.is_consistent());

        state.history.push_back(ChangeLogEntry {
            cycle: 3,
            timestamp: Utc::now(),
            created: 1,
            updated: 0,
            deleted: 0,
            unchanged: 0,
        });
        assert!(state.is_consistent());

        state.cycle = 4;
        assert!(!state.is_consistent());
    }

    #[test]
    fn test_sync_state_due() {
        let now = Utc::now();
        let mut state = SyncState::new(30, true);
        assert!(state.is_due(now));

        state.last_sync_at = Some(now - chrono::Duration::minutes(10));
        assert!(!state.is_due(now));

        state.last_sync_at = Some(now - chrono::Duration::minutes(31));
        assert!(state.is_due(now));
    }

    #[test]
    fn test_report_accumulation() {
        let mut report = ProcessingReport::default();
        report.created_ok = 2;
        report.deleted_ok = 1;
        report.push_error("d1", "vector_upsert", "rejected");
        assert_eq!(report.total_ok(), 3);
        assert_eq!(report.errors.len(), 1);
    }
}
