//! Search route.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use findex_engines::{SearchFilters, SearchQuery, SortOrder};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/search", post(post_search))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    filters: SearchFilters,
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    sort: SortOrder,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

/// POST /api/search — hybrid keyword + semantic retrieval.
async fn post_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Json<serde_json::Value> {
    let query = SearchQuery {
        query: request.query,
        filters: request.filters,
        page: request.page,
        page_size: request.page_size,
        sort: request.sort,
    };

    let started = std::time::Instant::now();
    let results = state.searcher.search(&query).await;

    Json(serde_json::json!({
        "total": results.total,
        "page": results.page,
        "pageSize": results.page_size,
        "hits": results.hits,
        "degraded": results.degraded,
        "searchTimeMs": started.elapsed().as_millis() as u64,
    }))
}
