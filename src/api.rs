//! HTTP surface consumed by the agent-orchestration layer.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;

use crate::context::ContextBlock;
use crate::error::MemoryError;
use crate::profile::UserProfile;
use crate::store::MemoryEntry;
use crate::AppState;

/// Run a blocking closure on the spawn_blocking pool and map JoinError.
/// Store operations are synchronous and may touch the filesystem.
async fn blocking<T, F>(f: F) -> Result<T, MemoryError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MemoryError::Internal(e.to_string()))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/memories", post(store_exchange))
        .route("/context", post(retrieve_context))
        .route("/users/{user_id}/profile", get(get_profile))
        .route("/users/{user_id}/entries", get(list_entries))
        .route("/users/{user_id}", delete(clear_user))
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .with_state(state)
}

fn health_data(state: &AppState) -> serde_json::Value {
    let stats = state.store.stats();
    serde_json::json!({
        "name": "mnemo",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "stats": stats,
    })
}

async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut data = health_data(&state);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("endpoints".to_string(), serde_json::json!({
            "GET /": "index with health data + endpoint list",
            "GET /health": "health data only",
            "POST /memories": "store one user/agent exchange",
            "POST /context": "rank stored exchanges and assemble a context block",
            "GET /users/:user_id/profile": "profile snapshot",
            "GET /users/:user_id/entries": "list entries (optional ?thread=)",
            "DELETE /users/:user_id": "clear all memory for a user",
        }));
    }
    Json(data)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(health_data(&state))
}

#[derive(Debug, Deserialize)]
pub struct StoreRequest {
    pub user_id: String,
    #[serde(default = "default_thread")]
    pub thread_id: String,
    pub query: String,
    #[serde(default)]
    pub response: String,
}

fn default_thread() -> String {
    "default".to_string()
}

async fn store_exchange(
    State(state): State<AppState>,
    Json(req): Json<StoreRequest>,
) -> Result<(StatusCode, Json<MemoryEntry>), MemoryError> {
    let store = state.store.clone();
    let entry = blocking(move || {
        store.store(&req.user_id, &req.thread_id, &req.query, &req.response)
    })
    .await??;
    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub user_id: String,
    pub query: String,
    pub k: Option<usize>,
    pub char_budget: Option<usize>,
}

async fn retrieve_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<ContextBlock>, MemoryError> {
    let store = state.store.clone();
    let block = blocking(move || {
        store.retrieve_context(&req.user_id, &req.query, req.k, req.char_budget)
    })
    .await??;
    Ok(Json(block))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, MemoryError> {
    let store = state.store.clone();
    let profile = blocking(move || store.get_profile(&user_id)).await??;
    Ok(Json(profile))
}

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    thread: Option<String>,
}

async fn list_entries(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(q): Query<EntriesQuery>,
) -> Result<Json<serde_json::Value>, MemoryError> {
    let store = state.store.clone();
    let entries = blocking(move || store.list_entries(&user_id, q.thread.as_deref())).await??;
    Ok(Json(serde_json::json!({
        "count": entries.len(),
        "entries": entries,
    })))
}

async fn clear_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, MemoryError> {
    let store = state.store.clone();
    blocking(move || store.clear(&user_id)).await??;
    Ok(Json(serde_json::json!({ "ok": true })))
}
