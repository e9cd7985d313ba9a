//! Shared application state.

use std::sync::Arc;

use findex_core::FindexConfig;
use findex_engines::{FullTextEngine, VectorEngine};
use findex_search::HybridSearcher;
use findex_sync::SyncManager;

/// Shared state accessible from all route handlers.
pub struct AppState {
    pub config: FindexConfig,
    pub searcher: HybridSearcher,
    pub manager: SyncManager,
    pub fulltext: Arc<dyn FullTextEngine>,
    pub vector: Arc<dyn VectorEngine>,
}
