//! Request handlers
//!
//! Common shape: JSON in, JSON out, UTF-8. Errors return an HTTP status plus
//! `{"detail": "..."}`.

use std::collections::BTreeSet;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use memory_core::{
    parse_time_expression, Memory, MemoryQueryResult, MetadataUpdate, StorageError, TagMatchMode,
    TagSelector, SERVICE_FAMILY_MARKER,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::AppState;

/// Wraps a [`StorageError`] so it can be returned directly from a handler.
pub struct ApiError(StorageError);

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            StorageError::NotFound(hash) => (StatusCode::NOT_FOUND, format!("memory not found: {hash}")),
            StorageError::DuplicateHash(hash) => (StatusCode::CONFLICT, format!("duplicate content hash: {hash}")),
            StorageError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            StorageError::EmbeddingFailure(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            StorageError::StorageBusy => (StatusCode::SERVICE_UNAVAILABLE, "storage busy, retry later".to_string()),
            StorageError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal storage error".to_string()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

fn resolve_hostname(body_hostname: Option<&str>, headers: &HeaderMap, include_hostname: bool) -> Option<String> {
    if !include_hostname {
        return None;
    }
    if let Some(h) = body_hostname {
        return Some(h.to_string());
    }
    if let Some(h) = headers.get("X-Client-Hostname").and_then(|v| v.to_str().ok()) {
        return Some(h.to_string());
    }
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: f64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_FAMILY_MARKER,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
    })
}

/// Stats fields are flattened into the top-level object (not nested under a
/// `storage` key) so [`memory_core::remote::RemoteStore::stats`] can
/// deserialize this response directly as a [`memory_core::StoreStats`],
/// ignoring the envelope fields it doesn't care about.
pub async fn health_detailed(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = state.store.stats().await?;
    let mut body = serde_json::to_value(stats).expect("StoreStats always serializes");
    if let Value::Object(map) = &mut body {
        map.insert("status".to_string(), json!("ok"));
        map.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        map.insert("uptime_seconds".to_string(), json!(state.started_at.elapsed().as_secs_f64()));
        map.insert("active_connections".to_string(), json!(state.bus.active_connections()));
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct StoreRequest {
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    memory_type: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    client_hostname: Option<String>,
}

#[derive(Debug, Serialize)]
struct StoreResponse {
    success: bool,
    message: String,
    content_hash: String,
    memory: Memory,
}

pub async fn store_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StoreRequest>,
) -> Result<Json<StoreResponse>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(StorageError::InvalidArgument("content must not be empty".to_string()).into());
    }

    let mut tags: BTreeSet<String> = req.tags.into_iter().collect();
    let mut metadata = req.metadata;

    if let Some(hostname) = resolve_hostname(req.client_hostname.as_deref(), &headers, state.config.include_hostname) {
        tags.insert(format!("source:{hostname}"));
        metadata.insert("hostname".to_string(), Value::String(hostname));
    }

    let memory = Memory::new(req.content, tags, req.memory_type, metadata, Vec::new());
    let stored = state.store.store(memory).await?;

    Ok(Json(StoreResponse {
        success: true,
        message: "memory stored".to_string(),
        content_hash: stored.content_hash.clone(),
        memory: stored,
    }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    memory_type: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
struct ListResponse {
    memories: Vec<Memory>,
    total: usize,
    page: usize,
    page_size: usize,
    has_more: bool,
}

/// There is no dedicated "list all" store operation; pagination is composed
/// from `Recall` with no query (all memories, newest first) or
/// `SearchByTag` when a tag filter is present, then sliced in-process.
pub async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = query.page.max(1);
    let page_size = query.page_size.max(1);
    let window = page * page_size;

    let mut memories: Vec<Memory> = if let Some(tag) = &query.tag {
        state.store.search_by_tag(std::slice::from_ref(tag), TagMatchMode::Any).await?
    } else {
        state
            .store
            .recall(None, window, None, None)
            .await
            .into_iter()
            .map(|r| r.memory)
            .collect()
    };

    if let Some(memory_type) = &query.memory_type {
        memories.retain(|m| m.memory_type.as_deref() == Some(memory_type.as_str()));
    }

    let total = memories.len();
    let start = (page - 1) * page_size;
    let page_items: Vec<Memory> = memories.into_iter().skip(start).take(page_size).collect();
    let has_more = start + page_items.len() < total;

    Ok(Json(ListResponse { memories: page_items, total, page, page_size, has_more }))
}

pub async fn get_memory(State(state): State<AppState>, Path(hash): Path<String>) -> Result<Json<Memory>, ApiError> {
    match state.store.get_by_hash(&hash).await? {
        Some(memory) => Ok(Json(memory)),
        None => Err(StorageError::NotFound(hash).into()),
    }
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
    content_hash: String,
}

pub async fn delete_memory(State(state): State<AppState>, Path(hash): Path<String>) -> Result<Json<DeleteResponse>, ApiError> {
    state.store.delete(&hash).await?;
    Ok(Json(DeleteResponse { success: true, message: "memory deleted".to_string(), content_hash: hash }))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_n_results")]
    n_results: usize,
    #[serde(default)]
    similarity_threshold: Option<f32>,
}

fn default_n_results() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<MemoryQueryResult>,
    total_found: usize,
    query: String,
    search_type: &'static str,
    processing_time_ms: u64,
}

pub async fn search(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let mut results = state.store.retrieve(&req.query, req.n_results).await;

    if let Some(threshold) = req.similarity_threshold {
        results.retain(|r| r.relevance_score.unwrap_or(0.0) >= threshold);
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.bus.publish_search_completed(&req.query, "semantic", results.len(), elapsed_ms);

    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        query: req.query,
        search_type: "semantic",
        processing_time_ms: elapsed_ms,
    }))
}

#[derive(Debug, Deserialize)]
struct TagSearchRequest {
    tags: Vec<String>,
    #[serde(default)]
    match_all: bool,
}

pub async fn search_by_tag(
    State(state): State<AppState>,
    Json(req): Json<TagSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let mode = if req.match_all { TagMatchMode::All } else { TagMatchMode::Any };
    let memories = state.store.search_by_tag(&req.tags, mode).await?;

    let results: Vec<MemoryQueryResult> = memories
        .into_iter()
        .map(|memory| MemoryQueryResult { memory, relevance_score: None, debug_info: Map::new() })
        .collect();

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let query = req.tags.join(",");
    state.bus.publish_search_completed(&query, "tag", results.len(), elapsed_ms);

    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        query,
        search_type: "tag",
        processing_time_ms: elapsed_ms,
    }))
}

#[derive(Debug, Deserialize)]
struct TimeSearchRequest {
    query: String,
    #[serde(default = "default_n_results")]
    n_results: usize,
}

pub async fn search_by_time(
    State(state): State<AppState>,
    Json(req): Json<TimeSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let (start, end, cleaned) = parse_time_expression(&req.query);

    let semantic_query = if cleaned.trim().is_empty() { None } else { Some(cleaned.as_str()) };
    let results = state.store.recall(semantic_query, req.n_results, start, end).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.bus.publish_search_completed(&req.query, "time", results.len(), elapsed_ms);

    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        query: req.query,
        search_type: "time",
        processing_time_ms: elapsed_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_priority_prefers_body_then_header_then_server() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Client-Hostname", "from-header".parse().unwrap());

        assert_eq!(resolve_hostname(Some("from-body"), &headers, true), Some("from-body".to_string()));
        assert_eq!(resolve_hostname(None, &headers, true), Some("from-header".to_string()));
        assert_eq!(resolve_hostname(None, &HeaderMap::new(), false), None);
    }
}
