//! Change detection: set algebra between the current batch and the last
//! committed snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use findex_core::{Document, Result};
use tracing::{debug, info};

use crate::snapshot::SnapshotStore;
use crate::types::{ChangeEntry, ChangeLogEntry, ChangeSet, SnapshotEntry, SnapshotState};

/// Classifies every document of a source batch as created, updated, deleted,
/// or unchanged relative to the previously persisted snapshot, then commits
/// the new snapshot together with a counts-only change-log entry.
pub struct ChangeDetector {
    snapshots: Arc<SnapshotStore>,
    history_limit: usize,
}

impl ChangeDetector {
    pub fn new(snapshots: Arc<SnapshotStore>, history_limit: usize) -> Self {
        Self {
            snapshots,
            history_limit,
        }
    }

    /// Detect changes for one source and commit the resulting snapshot.
    ///
    /// Commit failure leaves the prior snapshot authoritative and propagates,
    /// so a crashed cycle re-detects the same changes next time. Comparison
    /// is always against the most recently committed snapshot.
    pub async fn detect(&self, source: &str, current: &[Document]) -> Result<ChangeSet> {
        let previous = self.snapshots.load(source).await;
        let current_entries = build_entries(current);
        let changes = compare(source, &previous, &current_entries);

        let mut history = previous.history.clone();
        history.push_back(changes.summary());
        while history.len() > self.history_limit {
            history.pop_front();
        }

        let next = SnapshotState {
            cycle: changes.cycle,
            entries: current_entries,
            history,
        };
        self.snapshots.commit(source, &next).await?;

        info!(
            "Change detection for {source}: {} created, {} updated, {} deleted, {} unchanged",
            changes.created.len(),
            changes.updated.len(),
            changes.deleted.len(),
            changes.unchanged.len()
        );
        Ok(changes)
    }

    /// The bounded change history for a source, newest first.
    pub async fn history(&self, source: &str, limit: usize) -> Vec<ChangeLogEntry> {
        let state = self.snapshots.load(source).await;
        state.history.iter().rev().take(limit).cloned().collect()
    }
}

fn build_entries(documents: &[Document]) -> HashMap<String, SnapshotEntry> {
    let now = Utc::now();
    documents
        .iter()
        .map(|doc| {
            (
                doc.id.clone(),
                SnapshotEntry {
                    content_hash: doc.content_hash.clone(),
                    timestamp: doc.published_at.unwrap_or(now),
                    source_url: doc.url.clone(),
                },
            )
        })
        .collect()
}

fn compare(
    source: &str,
    previous: &SnapshotState,
    current: &HashMap<String, SnapshotEntry>,
) -> ChangeSet {
    let mut changes = ChangeSet {
        source: source.to_string(),
        cycle: previous.cycle + 1,
        ..Default::default()
    };

    for (id, entry) in current {
        match previous.entries.get(id) {
            None => changes.created.push(ChangeEntry {
                id: id.clone(),
                previous: None,
                current: Some(entry.clone()),
            }),
            Some(old) if old.content_hash != entry.content_hash => {
                changes.updated.push(ChangeEntry {
                    id: id.clone(),
                    previous: Some(old.clone()),
                    current: Some(entry.clone()),
                })
            }
            Some(old) => changes.unchanged.push(ChangeEntry {
                id: id.clone(),
                previous: Some(old.clone()),
                current: Some(entry.clone()),
            }),
        }
    }

    for (id, old) in &previous.entries {
        if !current.contains_key(id) {
            changes.deleted.push(ChangeEntry {
                id: id.clone(),
                previous: Some(old.clone()),
                current: None,
            });
        }
    }

    debug!(
        "Compared snapshots for {source}: cycle {} -> {}",
        previous.cycle, changes.cycle
    );
    changes
}
