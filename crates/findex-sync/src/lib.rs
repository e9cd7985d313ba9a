//! Findex Sync — turns repeated full pulls from data sources into correct
//! incremental index updates.
//!
//! `ChangeDetector` diffs the current batch against the last committed
//! snapshot, `IncrementalProcessor` pushes the classified changes into the
//! full-text and vector engines, and `SyncManager` is the state machine that
//! schedules the two per registered source.

pub mod detector;
pub mod manager;
pub mod processor;
pub mod snapshot;
pub mod types;

pub use detector::ChangeDetector;
pub use manager::{FetchCallback, SyncManager};
pub use processor::IncrementalProcessor;
pub use snapshot::SnapshotStore;
pub use types::*;
