//! Findex — financial document corpus engine with hybrid retrieval.

use std::sync::Arc;

use findex_core::FindexConfig;
use findex_engines::{
    DistributedCache, ElasticFullText, Embedder, FullTextEngine, HashingEmbedder,
    HttpEmbedder, MemoryCache, MemoryFullText, MemoryVector, NoopFeatureExtractor,
    QdrantVector, RedisCache, VectorEngine,
};
use findex_process::DocumentPipeline;
use findex_search::HybridSearcher;
use findex_sync::{ChangeDetector, IncrementalProcessor, SnapshotStore, SyncManager};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod routes;
mod sources;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = FindexConfig::from_env();
    let port = config.port;

    // Engines: real clients when configured, in-memory fallbacks otherwise
    let fulltext: Arc<dyn FullTextEngine> = match &config.elasticsearch_url {
        Some(url) => {
            info!("Full-text engine: Elasticsearch at {url}");
            Arc::new(ElasticFullText::new(url.clone(), config.fulltext_index.clone()))
        }
        None => {
            warn!("ELASTICSEARCH_URL unset, using the in-memory full-text engine");
            Arc::new(MemoryFullText::new())
        }
    };

    let vector: Arc<dyn VectorEngine> = match &config.qdrant_url {
        Some(url) => {
            info!("Vector engine: Qdrant at {url}");
            let engine = QdrantVector::new(
                url.clone(),
                config.vector_collection.clone(),
                config.vector_dimension,
            );
            if let Err(e) = engine.ensure_collection().await {
                warn!("Could not ensure vector collection: {e}");
            }
            Arc::new(engine)
        }
        None => {
            warn!("QDRANT_URL unset, using the in-memory vector engine");
            Arc::new(MemoryVector::new())
        }
    };

    let cache: Arc<dyn DistributedCache> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(cache) => Arc::new(cache),
            Err(e) => {
                warn!("Redis unavailable ({e}), using the in-process cache");
                Arc::new(MemoryCache::new())
            }
        },
        None => Arc::new(MemoryCache::new()),
    };

    let embedder: Arc<dyn Embedder> = match &config.embedder_url {
        Some(url) => {
            info!("Embedder: service at {url}");
            Arc::new(HttpEmbedder::new(url.clone(), config.vector_dimension))
        }
        None => {
            warn!("EMBEDDER_URL unset, using the hash fallback embedder");
            Arc::new(HashingEmbedder::new(config.vector_dimension))
        }
    };

    // Pipeline and sync plumbing
    let pipeline = Arc::new(DocumentPipeline::new(
        &config,
        cache.clone(),
        Arc::new(NoopFeatureExtractor::new()),
    ));
    let snapshots = Arc::new(SnapshotStore::new(&config, cache));
    let detector = Arc::new(ChangeDetector::new(snapshots, config.change_history_limit));
    let processor = Arc::new(IncrementalProcessor::new(
        &config,
        fulltext.clone(),
        vector.clone(),
        embedder.clone(),
    ));
    let manager = SyncManager::new(&config, pipeline, detector, processor);

    // Register sources from config, if any
    let sources_file = config.state_dir.join("sources.json");
    sources::register_from_file(&manager, &sources_file);

    let searcher = HybridSearcher::new(&config, fulltext.clone(), vector.clone(), embedder);

    let state = Arc::new(AppState {
        config,
        searcher,
        manager,
        fulltext,
        vector,
    });

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Findex listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
