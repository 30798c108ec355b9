//! Shared test fixtures for the end-to-end suite.
//!
//! A deterministic, dependency-free embedding provider stands in for the
//! real fastembed/ONNX backends: these tests exercise storage, recall,
//! coordination and the HTTP/SSE surface, not model quality.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use memory_core::embeddings::{EmbeddingError, EmbeddingProvider};
use memory_core::events::{null_sink, EventSink};
use memory_core::storage::SqliteStore;

/// Embeds text as a bag-of-words vector over a fixed vocabulary, so memories
/// sharing content words score higher than unrelated ones under cosine
/// similarity, without pulling in a real model.
pub struct KeywordProvider {
    vocabulary: Vec<&'static str>,
}

impl Default for KeywordProvider {
    fn default() -> Self {
        Self {
            vocabulary: vec![
                "python", "programming", "language", "versatile", "database", "databases",
                "rust", "memory", "systems", "web", "server", "query",
            ],
        }
    }
}

impl EmbeddingProvider for KeywordProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect();
        // Never produce an all-zero vector; fall back to a content hash bucket.
        if v.iter().all(|x| *x == 0.0) {
            let bucket = lower.bytes().map(|b| b as u32).sum::<u32>() as usize % v.len().max(1);
            if let Some(slot) = v.get_mut(bucket) {
                *slot = 1.0;
            }
        }
        memory_core::embeddings::l2_normalize(&mut v);
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }

    fn model_name(&self) -> &str {
        "keyword-test-provider"
    }
}

/// Opens a fresh `SqliteStore` backed by a temp directory that lives for the
/// duration of the test process (never cleaned up mid-test).
pub fn open_test_store() -> SqliteStore {
    open_test_store_with_events(null_sink())
}

pub fn open_test_store_with_events(events: Arc<dyn EventSink>) -> SqliteStore {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("e2e.db");
    std::mem::forget(dir);
    SqliteStore::open(path, Arc::new(KeywordProvider::default()), events).expect("open store")
}

pub fn test_db_path() -> PathBuf {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("e2e.db");
    std::mem::forget(dir);
    path
}

/// Binds a `TcpListener` on an OS-assigned port and returns both the
/// listener and the port number, so callers can start serving before
/// handing the port to a client.
pub async fn bind_ephemeral() -> (tokio::net::TcpListener, u16) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}
