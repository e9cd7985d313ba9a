//! Data-source registration from a JSON config file.
//!
//! Each configured source is a URL expected to return the latest full batch
//! of raw documents as a JSON array; the fetch callback wraps a GET against
//! it. How the feed is produced (crawler, export job) is not our concern.

use std::path::Path;
use std::sync::Arc;

use findex_core::{Error, RawDocument};
use findex_sync::{FetchCallback, SyncManager};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub interval_minutes: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Load `sources.json` (if present) and register every entry.
pub fn register_from_file(manager: &SyncManager, path: &Path) {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No sources file at {}, none registered", path.display());
            return;
        }
        Err(e) => {
            warn!("Failed to read sources file {}: {e}", path.display());
            return;
        }
    };

    let configs: Vec<SourceConfig> = match serde_json::from_str(&raw) {
        Ok(configs) => configs,
        Err(e) => {
            warn!("Malformed sources file {}: {e}", path.display());
            return;
        }
    };

    for config in configs {
        let fetch = http_fetch(config.url.clone());
        manager.register_source(config.name, fetch, config.interval_minutes, config.enabled);
    }
}

/// Fetch callback pulling a JSON array of raw documents over HTTP.
pub fn http_fetch(url: String) -> FetchCallback {
    let client = reqwest::Client::new();
    Arc::new(move || {
        let client = client.clone();
        let url = url.clone();
        Box::pin(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| Error::Sync(format!("source fetch failed: {e}")))?;
            if !response.status().is_success() {
                return Err(Error::Sync(format!(
                    "source fetch returned {}",
                    response.status()
                )));
            }
            let documents: Vec<RawDocument> = response
                .json()
                .await
                .map_err(|e| Error::Sync(format!("source returned malformed batch: {e}")))?;
            Ok(documents)
        })
    })
}
