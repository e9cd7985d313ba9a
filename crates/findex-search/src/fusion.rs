//! Weighted score fusion over parallel full-text and vector searches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use findex_core::FindexConfig;
use findex_engines::{
    Embedder, EngineHit, FullTextEngine, FullTextResults, SearchQuery, VectorEngine,
};
use serde::Serialize;
use tracing::{debug, warn};

/// One fused result. `sources` names the engines that returned the document;
/// a missing engine contributes 0 to the fused score.
#[derive(Debug, Clone, Serialize)]
pub struct FusedHit {
    pub id: String,
    pub fused_score: f64,
    pub fulltext_score: f64,
    pub vector_score: f64,
    pub sources: Vec<String>,
    pub payload: serde_json::Value,
}

/// Ranked, paginated output of one hybrid query.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResults {
    /// `max(fulltext_total, vector_total)`: an approximation of the union
    /// size, not an exact count.
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub hits: Vec<FusedHit>,
    /// Engines that failed or timed out for this query. A degraded engine
    /// never empties the result set; the healthy side still answers.
    pub degraded: Vec<String>,
}

/// Issues both searches in parallel and merges them by weighted score.
pub struct HybridSearcher {
    fulltext: Arc<dyn FullTextEngine>,
    vector: Arc<dyn VectorEngine>,
    embedder: Arc<dyn Embedder>,
    fulltext_weight: f64,
    vector_weight: f64,
    vector_score_threshold: f64,
    call_timeout: Duration,
}

impl HybridSearcher {
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
            fulltext_weight: config.fusion_fulltext_weight,
            vector_weight: config.fusion_vector_weight,
            vector_score_threshold: config.vector_score_threshold,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Hybrid search: both engines are asked for `page * page_size`
    /// candidates from rank 1, fused, sorted, and sliced to the requested
    /// window. Never fails outright: engine failures degrade the query.
    pub async fn search(&self, query: &SearchQuery) -> RankedResults {
        let page = query.page.max(1);
        let page_size = query.page_size.max(1);
        let depth = page * page_size;

        let mut candidate_query = query.clone();
        candidate_query.page = 1;
        candidate_query.page_size = depth;

        let (fulltext_result, vector_result) = tokio::join!(
            self.fulltext_side(&candidate_query),
            self.vector_side(&candidate_query, depth),
        );

        let mut degraded = Vec::new();
        let (fulltext_total, fulltext_hits) = match fulltext_result {
            Ok(results) => (results.total, results.hits),
            Err(e) => {
                warn!("Full-text side degraded: {e}");
                degraded.push("fulltext".to_string());
                (0, Vec::new())
            }
        };
        let vector_hits = match vector_result {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector side degraded: {e}");
                degraded.push("vector".to_string());
                Vec::new()
            }
        };

        let vector_total = vector_hits.len() as u64;
        let mut hits = fuse(
            &fulltext_hits,
            &vector_hits,
            self.fulltext_weight,
            self.vector_weight,
        );

        let start = (page - 1) * page_size;
        let window: Vec<FusedHit> = hits.drain(..).skip(start).take(page_size).collect();

        debug!(
            "Hybrid search '{}': fts_total={fulltext_total}, vector_hits={vector_total}, window={}",
            query.query,
            window.len()
        );

        RankedResults {
            total: fulltext_total.max(vector_total),
            page,
            page_size,
            hits: window,
            degraded,
        }
    }

    async fn fulltext_side(&self, query: &SearchQuery) -> findex_core::Result<FullTextResults> {
        tokio::time::timeout(self.call_timeout, self.fulltext.search(query))
            .await
            .map_err(|_| findex_core::Error::Timeout(self.call_timeout.as_secs()))?
    }

    async fn vector_side(
        &self,
        query: &SearchQuery,
        depth: usize,
    ) -> findex_core::Result<Vec<EngineHit>> {
        let embed = tokio::time::timeout(self.call_timeout, self.embedder.embed(&query.query))
            .await
            .map_err(|_| findex_core::Error::Timeout(self.call_timeout.as_secs()))?;
        let query_vector = embed?;

        tokio::time::timeout(
            self.call_timeout,
            self.vector.search_similar(
                &query_vector,
                &query.filters,
                depth,
                self.vector_score_threshold,
            ),
        )
        .await
        .map_err(|_| findex_core::Error::Timeout(self.call_timeout.as_secs()))?
    }
}

/// Merge the two ranked lists: `fused = fts * w_fts + vector * w_vec`, with a
/// missing component contributing 0. Descending by fused score, document id
/// as the tiebreak so pagination is reproducible.
pub fn fuse(
    fulltext_hits: &[EngineHit],
    vector_hits: &[EngineHit],
    fulltext_weight: f64,
    vector_weight: f64,
) -> Vec<FusedHit> {
    let mut merged: HashMap<&str, FusedHit> = HashMap::new();

    for hit in fulltext_hits {
        merged.insert(
            hit.id.as_str(),
            FusedHit {
                id: hit.id.clone(),
                fused_score: hit.score * fulltext_weight,
                fulltext_score: hit.score,
                vector_score: 0.0,
                sources: vec!["fulltext".to_string()],
                payload: hit.payload.clone(),
            },
        );
    }

    for hit in vector_hits {
        match merged.get_mut(hit.id.as_str()) {
            Some(fused) => {
                fused.fused_score += hit.score * vector_weight;
                fused.vector_score = hit.score;
                fused.sources.push("vector".to_string());
            }
            None => {
                merged.insert(
                    hit.id.as_str(),
                    FusedHit {
                        id: hit.id.clone(),
                        fused_score: hit.score * vector_weight,
                        fulltext_score: 0.0,
                        vector_score: hit.score,
                        sources: vec!["vector".to_string()],
                        payload: hit.payload.clone(),
                    },
                );
            }
        }
    }

    let mut hits: Vec<FusedHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use findex_core::{Document, DocumentFeatures};
    use findex_engines::{HashingEmbedder, MemoryFullText, MemoryVector, SearchFilters};

    fn hit(id: &str, score: f64) -> EngineHit {
        EngineHit {
            id: id.into(),
            score,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_fusion_weights_and_missing_component() {
        let fts = vec![hit("a", 1.0), hit("b", 0.5)];
        let vec = vec![hit("a", 0.8), hit("c", 0.9)];
        let fused = fuse(&fts, &vec, 0.6, 0.4);

        let by_id: HashMap<&str, &FusedHit> =
            fused.iter().map(|h| (h.id.as_str(), h)).collect();
        assert!((by_id["a"].fused_score - (1.0 * 0.6 + 0.8 * 0.4)).abs() < 1e-9);
        assert!((by_id["b"].fused_score - 0.3).abs() < 1e-9);
        assert!((by_id["c"].fused_score - 0.36).abs() < 1e-9);
        assert_eq!(by_id["a"].sources, vec!["fulltext", "vector"]);
        assert_eq!(by_id["c"].sources, vec!["vector"]);
    }

    #[test]
    fn test_fusion_deterministic_order() {
        let fts = vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)];
        let first = fuse(&fts, &[], 0.6, 0.4);
        let second = fuse(&fts, &[], 0.6, 0.4);

        let order: Vec<&str> = first.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        let order_again: Vec<&str> = second.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, order_again);
    }

    #[test]
    fn test_single_engine_never_beats_strictly_higher_dual() {
        // "dual" is in both engines with strictly higher per-engine scores
        // than "solo" has anywhere; it must rank first
        let fts = vec![hit("dual", 0.9), hit("solo", 0.8)];
        let vec = vec![hit("dual", 0.9)];
        let fused = fuse(&fts, &vec, 0.6, 0.4);
        assert_eq!(fused[0].id, "dual");
        assert!(fused[0].fused_score > fused[1].fused_score);
    }

    fn doc(id: &str, title: &str, body: &str) -> Document {
        Document {
            id: id.into(),
            title: title.into(),
            body: body.into(),
            url: format!("https://example.com/{id}"),
            source: "test".into(),
            published_at: None,
            tags: vec![],
            content_hash: format!("hash-{id}"),
            word_count: body.split_whitespace().count(),
            char_count: body.len(),
            features: DocumentFeatures::default(),
            quality: None,
            embedding: None,
            duplicate_of: None,
            metadata: serde_json::Value::Null,
        }
    }

    async fn searcher_with_corpus() -> (HybridSearcher, Arc<MemoryFullText>, Arc<MemoryVector>) {
        let fulltext = Arc::new(MemoryFullText::new());
        let vector = Arc::new(MemoryVector::new());
        let embedder = Arc::new(HashingEmbedder::new(64));

        for (id, title, body) in [
            ("a", "Fed rate decision", "The central bank raised rates by 25 basis points"),
            ("b", "Earnings season preview", "Banks report quarterly earnings next week"),
            ("c", "Rate cut expectations", "Markets price in a rate cut later this year"),
        ] {
            let document = doc(id, title, body);
            fulltext.index(&document).await.unwrap();
            let embedding = embedder.embed(&format!("{title}\n{body}")).await.unwrap();
            vector
                .upsert(id, &embedding, &serde_json::to_value(&document).unwrap())
                .await
                .unwrap();
        }

        let mut config = FindexConfig::default();
        config.call_timeout_secs = 2;
        config.vector_score_threshold = -1.0;
        let searcher = HybridSearcher::new(&config, fulltext.clone(), vector.clone(), embedder);
        (searcher, fulltext, vector)
    }

    #[tokio::test]
    async fn test_hybrid_search_returns_ranked_results() {
        let (searcher, _, _) = searcher_with_corpus().await;
        let results = searcher.search(&SearchQuery::new("rate decision")).await;

        assert!(results.total > 0);
        assert!(!results.hits.is_empty());
        assert!(results.degraded.is_empty());
        for pair in results.hits.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }

    #[tokio::test]
    async fn test_degraded_fulltext_still_answers() {
        struct DownFullText;

        #[async_trait::async_trait]
        impl FullTextEngine for DownFullText {
            async fn index(&self, _doc: &Document) -> findex_core::Result<()> {
                Err(findex_core::Error::FullText("down".into()))
            }
            async fn delete(&self, _id: &str) -> findex_core::Result<bool> {
                Err(findex_core::Error::FullText("down".into()))
            }
            async fn search(
                &self,
                _query: &SearchQuery,
            ) -> findex_core::Result<FullTextResults> {
                Err(findex_core::Error::FullText("down".into()))
            }
            async fn ping(&self) -> bool {
                false
            }
        }

        let vector = Arc::new(MemoryVector::new());
        let embedder = Arc::new(HashingEmbedder::new(64));
        let document = doc("a", "Fed rate decision", "The central bank raised rates");
        let embedding = embedder.embed("Fed rate decision").await.unwrap();
        vector
            .upsert("a", &embedding, &serde_json::to_value(&document).unwrap())
            .await
            .unwrap();

        let mut config = FindexConfig::default();
        config.call_timeout_secs = 2;
        config.vector_score_threshold = -1.0;
        let searcher = HybridSearcher::new(&config, Arc::new(DownFullText), vector, embedder);

        let results = searcher.search(&SearchQuery::new("Fed rate decision")).await;
        assert_eq!(results.degraded, vec!["fulltext"]);
        // The healthy engine still answers; never an empty set because the
        // other engine failed
        assert!(!results.hits.is_empty());
        assert_eq!(results.hits[0].sources, vec!["vector"]);
    }

    #[tokio::test]
    async fn test_pagination_window() {
        let (searcher, _, _) = searcher_with_corpus().await;

        let mut query = SearchQuery::new("rate");
        query.page = 2;
        query.page_size = 1;
        let page_two = searcher.search(&query).await;
        assert_eq!(page_two.hits.len(), 1);

        query.page = 1;
        query.page_size = 1;
        let page_one = searcher.search(&query).await;
        assert_ne!(page_one.hits[0].id, page_two.hits[0].id);
    }

    #[tokio::test]
    async fn test_source_filter_respected() {
        let (searcher, _, _) = searcher_with_corpus().await;
        let mut query = SearchQuery::new("rate");
        query.filters = SearchFilters {
            source: Some("nonexistent".into()),
            ..Default::default()
        };
        let results = searcher.search(&query).await;
        assert!(results.hits.is_empty());
    }
}
