//! Health route.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// GET /api/health — per-engine reachability.
async fn get_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (fulltext_up, vector_up) = tokio::join!(state.fulltext.ping(), state.vector.ping());

    let status = if fulltext_up && vector_up {
        "healthy"
    } else if fulltext_up || vector_up {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(serde_json::json!({
        "status": status,
        "fulltext": fulltext_up,
        "vector": vector_up,
        "sync": state.manager.status().status,
    }))
}
