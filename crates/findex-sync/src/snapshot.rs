//! Snapshot persistence: distributed cache primary, local JSON mirror
//! fallback, replace-whole-value commits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use findex_core::{Error, FindexConfig, Result};
use findex_engines::DistributedCache;
use tracing::{debug, info, warn};

use crate::types::SnapshotState;

const SNAPSHOT_KEY_PREFIX: &str = "findex:snapshot:";

/// Owns snapshot persistence for the change detector. Each source has one
/// `SnapshotState` value; loads prefer the cache and fall back to the local
/// mirror, commits write the mirror first (tempfile + rename) and then the
/// cache best-effort.
pub struct SnapshotStore {
    cache: Arc<dyn DistributedCache>,
    state_dir: PathBuf,
    ttl_secs: u64,
}

impl SnapshotStore {
    pub fn new(config: &FindexConfig, cache: Arc<dyn DistributedCache>) -> Self {
        Self {
            cache,
            state_dir: config.state_dir.clone(),
            ttl_secs: config.cache_ttl_secs,
        }
    }

    /// Load the last committed snapshot for a source. A missing, corrupt, or
    /// inconsistent value yields the empty state, which forces the next
    /// detection to run as a full re-detection.
    pub async fn load(&self, source: &str) -> SnapshotState {
        match self.load_from_cache(source).await {
            Some(state) => state,
            None => self.load_from_mirror(source),
        }
    }

    /// Commit a new snapshot state. The mirror write is the transactional
    /// step: if it fails, nothing is changed and the prior state stays
    /// authoritative. A cache failure after the mirror succeeded degrades to
    /// mirror-only persistence.
    pub async fn commit(&self, source: &str, state: &SnapshotState) -> Result<()> {
        let serialized = serde_json::to_string(state)?;

        self.write_mirror(source, &serialized)?;

        let key = Self::cache_key(source);
        if let Err(e) = self
            .cache
            .set(&key, &serialized, Some(self.ttl_secs))
            .await
        {
            warn!("Snapshot cache write failed for {source}, mirror only: {e}");
        }

        debug!(
            "Committed snapshot for {source}: cycle={}, {} documents",
            state.cycle,
            state.entries.len()
        );
        Ok(())
    }

    async fn load_from_cache(&self, source: &str) -> Option<SnapshotState> {
        let key = Self::cache_key(source);
        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Snapshot cache read failed for {source}: {e}");
                return None;
            }
        };

        match serde_json::from_str::<SnapshotState>(&raw) {
            Ok(state) if state.is_consistent() => Some(state),
            Ok(state) => {
                warn!(
                    "Cached snapshot for {source} inconsistent (cycle {}), discarding",
                    state.cycle
                );
                None
            }
            Err(e) => {
                warn!("Cached snapshot for {source} corrupt, discarding: {e}");
                None
            }
        }
    }

    fn load_from_mirror(&self, source: &str) -> SnapshotState {
        let path = self.mirror_path(source);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No prior snapshot for {source}, starting empty");
                return SnapshotState::default();
            }
            Err(e) => {
                warn!("Snapshot mirror read failed for {source}: {e}");
                return SnapshotState::default();
            }
        };

        match serde_json::from_str::<SnapshotState>(&raw) {
            Ok(state) if state.is_consistent() => state,
            Ok(state) => {
                warn!(
                    "Mirrored snapshot for {source} inconsistent (cycle {}), forcing full re-detection",
                    state.cycle
                );
                SnapshotState::default()
            }
            Err(e) => {
                warn!("Mirrored snapshot for {source} corrupt: {e}");
                SnapshotState::default()
            }
        }
    }

    fn write_mirror(&self, source: &str, serialized: &str) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| Error::Snapshot(format!("state dir unavailable: {e}")))?;

        let path = self.mirror_path(source);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)
            .map_err(|e| Error::Snapshot(format!("mirror write failed: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Snapshot(format!("mirror rename failed: {e}")))?;
        Ok(())
    }

    fn cache_key(source: &str) -> String {
        format!("{SNAPSHOT_KEY_PREFIX}{source}")
    }

    fn mirror_path(&self, source: &str) -> PathBuf {
        let safe: String = source
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.state_dir.join(format!("{safe}.snapshot.json"))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeLogEntry, SnapshotEntry};
    use findex_engines::MemoryCache;

    fn store_in(dir: &Path, cache: Arc<dyn DistributedCache>) -> SnapshotStore {
        let mut config = FindexConfig::default();
        config.state_dir = dir.to_path_buf();
        SnapshotStore::new(&config, cache)
    }

    fn sample_state(cycle: u64) -> SnapshotState {
        let mut state = SnapshotState::default();
        state.cycle = cycle;
        state.entries.insert(
            "doc-1".into(),
            SnapshotEntry {
                content_hash: "abc".into(),
                timestamp: chrono::Utc::now(),
                source_url: "https://example.com/1".into(),
            },
        );
        state.history.push_back(ChangeLogEntry {
            cycle,
            timestamp: chrono::Utc::now(),
            created: 1,
            updated: 0,
            deleted: 0,
            unchanged: 0,
        });
        state
    }

    #[tokio::test]
    async fn test_roundtrip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path(), Arc::new(MemoryCache::new()));

        let state = sample_state(1);
        store.commit("news", &state).await.unwrap();

        let loaded = store.load("news").await;
        assert_eq!(loaded.cycle, 1);
        assert!(loaded.entries.contains_key("doc-1"));
    }

    #[tokio::test]
    async fn test_mirror_survives_cache_loss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::new());
        let store = store_in(dir.path(), cache.clone());

        store.commit("news", &sample_state(2)).await.unwrap();

        // Simulate cache eviction; the mirror must still serve the state
        cache.delete("findex:snapshot:news").await.unwrap();
        let loaded = store.load("news").await;
        assert_eq!(loaded.cycle, 2);
    }

    #[tokio::test]
    async fn test_inconsistent_state_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(MemoryCache::new());
        let store = store_in(dir.path(), cache.clone());

        // History says cycle 1, state says cycle 9: inconsistent
        let mut state = sample_state(1);
        state.cycle = 9;
        cache
            .set(
                "findex:snapshot:news",
                &serde_json::to_string(&state).unwrap(),
                None,
            )
            .await
            .unwrap();

        let loaded = store.load("news").await;
        assert_eq!(loaded.cycle, 0);
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path(), Arc::new(MemoryCache::new()));
        let loaded = store.load("never-seen").await;
        assert_eq!(loaded.cycle, 0);
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn test_mirror_path_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path(), Arc::new(MemoryCache::new()));
        store.commit("weird/../source", &sample_state(1)).await.unwrap();

        let loaded = store.load("weird/../source").await;
        assert_eq!(loaded.cycle, 1);
        // Nothing escaped the state dir
        assert!(dir.path().join("weird_____source.snapshot.json").exists());
    }
}
