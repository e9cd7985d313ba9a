//! Sync control routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync/status", get(get_status))
        .route("/sync/start", post(post_start))
        .route("/sync/stop", post(post_stop))
        .route("/sync/pause", post(post_pause))
        .route("/sync/resume", post(post_resume))
        .route("/sync/trigger", post(post_trigger))
        .route("/sync/history/{source}", get(get_history))
        .route("/sync/sources/{source}/enable", post(post_enable))
        .route("/sync/sources/{source}/disable", post(post_disable))
}

/// GET /api/sync/status — manager state, per-source sync states, stats.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = state.manager.status();
    Json(serde_json::json!(status))
}

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    interval_minutes: Option<u64>,
    #[serde(default)]
    run_immediately: bool,
}

/// POST /api/sync/start
async fn post_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state
        .manager
        .start(request.interval_minutes, request.run_immediately)
    {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "started": true }))),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "started": false, "error": e.to_string() })),
        ),
    }
}

/// POST /api/sync/stop
async fn post_stop(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.manager.stop().await {
        Ok(()) => Json(serde_json::json!({ "stopped": true })),
        Err(e) => Json(serde_json::json!({ "stopped": false, "error": e.to_string() })),
    }
}

/// POST /api/sync/pause
async fn post_pause(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "paused": state.manager.pause() }))
}

/// POST /api/sync/resume
async fn post_resume(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "resumed": state.manager.resume() }))
}

#[derive(Deserialize)]
struct TriggerRequest {
    #[serde(default)]
    sources: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

/// POST /api/sync/trigger — run cycles now, outside the schedule.
async fn post_trigger(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerRequest>,
) -> Json<serde_json::Value> {
    let results = state
        .manager
        .trigger_manual_sync(request.sources.as_deref(), request.force)
        .await;

    let successful = results.values().filter(|r| r.success).count();
    let processed: usize = results.values().map(|r| r.processed).sum();
    Json(serde_json::json!({
        "successfulSources": successful,
        "totalProcessed": processed,
        "results": results,
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    10
}

/// GET /api/sync/history/{source} — recent change-log entries, newest first.
async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let history = state.manager.change_history(&source, query.limit).await;
    Json(serde_json::json!({ "source": source, "history": history }))
}

/// POST /api/sync/sources/{source}/enable
async fn post_enable(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    toggle(&state, &source, true)
}

/// POST /api/sync/sources/{source}/disable
async fn post_disable(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    toggle(&state, &source, false)
}

fn toggle(
    state: &AppState,
    source: &str,
    enabled: bool,
) -> (StatusCode, Json<serde_json::Value>) {
    let changed = if enabled {
        state.manager.enable_source(source)
    } else {
        state.manager.disable_source(source)
    };
    if changed {
        (StatusCode::OK, Json(serde_json::json!({ "enabled": enabled })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown source" })),
        )
    }
}
