//! HTTP/SSE surface
//!
//! Thin handlers translating REST + SSE onto [`memory_core::storage::Store`]
//! and [`crate::events::EventBus`] calls. Only the endpoints the Remote
//! Store client and the SSE bus rely on are part of the core contract;
//! everything here stays a direct mapping to those two seams.

pub mod handlers;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use memory_core::storage::Store;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::events::EventBus;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new().allow_origin(allowed).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.cors_origins);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/health/detailed", get(handlers::health_detailed))
        .route("/api/memories", post(handlers::store_memory).get(handlers::list_memories))
        .route("/api/memories/{hash}", get(handlers::get_memory).delete(handlers::delete_memory))
        .route("/api/search", post(handlers::search))
        .route("/api/search/by-tag", post(handlers::search_by_tag))
        .route("/api/search/by-time", post(handlers::search_by_time))
        .route("/api/events", get(sse::stream))
        .route("/api/events/stats", get(sse::stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
