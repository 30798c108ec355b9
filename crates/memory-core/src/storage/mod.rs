//! Embedded and remote storage
//!
//! [`Store`] is the single interface both the embedded [`sqlite::SqliteStore`]
//! and the HTTP-backed [`crate::remote::RemoteStore`] implement, so upstream
//! code is mode-agnostic about whether it's talking to a local database or a
//! sibling process's server — see [`crate::coordinator::detect`].

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingError;
use crate::memory::{Memory, MemoryQueryResult, MetadataUpdate, TagMatchMode};

/// The §7 error taxonomy, as observable variants rather than strings.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A memory with this content hash already exists.
    #[error("duplicate content hash: {0}")]
    DuplicateHash(String),

    /// No memory exists with the given hash.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// Malformed caller input: empty tag list, wrong update shape, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding provider failed to produce a vector.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(#[from] EmbeddingError),

    /// The write could not acquire the database within the retry budget.
    #[error("storage busy, retry later")]
    StorageBusy,

    /// Anything else; always logged with context before being wrapped.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StorageError::StorageBusy
            }
            _ => StorageError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Either a single tag or a list of tags, accepted by [`Store::delete_by_tag`]
/// for OR-semantics deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagSelector {
    One(String),
    Many(Vec<String>),
}

impl TagSelector {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TagSelector::One(t) => vec![t],
            TagSelector::Many(ts) => ts,
        }
    }
}

/// Aggregate statistics returned by [`Store::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_memories: i64,
    pub unique_tags: i64,
    pub database_size_bytes: u64,
    pub embedding_model: String,
    pub embedding_dimension: usize,
}

/// The operations every storage backend must support, per the embedded
/// store's contract. Implemented by [`sqlite::SqliteStore`] (direct mode)
/// and `crate::remote::RemoteStore` (client mode).
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `memory`. Fails with `DuplicateHash` if its content hash is
    /// already present. Emits `memory_stored` on success.
    async fn store(&self, memory: Memory) -> Result<Memory>;

    /// Hybrid semantic search for `query`, returning at most `n` results
    /// ordered by descending relevance. Never errors; failures degrade to
    /// an empty result, logged.
    async fn retrieve(&self, query: &str, n: usize) -> Vec<MemoryQueryResult>;

    /// Semantic search optionally narrowed to a half-open time window. When
    /// `query` is `None`, results are time-filtered and ordered by
    /// `created_at` descending with no relevance score.
    async fn recall(
        &self,
        query: Option<&str>,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<MemoryQueryResult>;

    /// All memories matching `tags` under `mode`. Errors if `tags` is empty.
    async fn search_by_tag(&self, tags: &[String], mode: TagMatchMode) -> Result<Vec<Memory>>;

    /// Look up a single memory by its content hash.
    async fn get_by_hash(&self, hash: &str) -> Result<Option<Memory>>;

    /// Apply a sparse metadata update. `content`/`content_hash`/`embedding`
    /// are immutable; `updated_at` is always refreshed.
    async fn update_metadata(
        &self,
        hash: &str,
        update: MetadataUpdate,
        preserve_created_at: bool,
    ) -> Result<Memory>;

    /// Delete a single memory by hash.
    async fn delete(&self, hash: &str) -> Result<()>;

    /// Delete every memory matching any of `tags` (OR semantics). Returns
    /// the count removed.
    async fn delete_by_tag(&self, tags: TagSelector) -> Result<usize>;

    /// Delete every memory matching all of `tags` (AND semantics).
    async fn delete_by_all_tags(&self, tags: &[String]) -> Result<usize>;

    /// Delete every memory whose `created_at` falls in `[start, end]`,
    /// optionally narrowed to memories carrying `tag`.
    async fn delete_by_time_range(&self, start: f64, end: f64, tag: Option<&str>) -> Result<usize>;

    /// Keep the earliest-inserted row per content hash, delete the rest.
    /// Returns the count removed.
    async fn cleanup_duplicates(&self) -> Result<usize>;

    /// Aggregate statistics about the store.
    async fn stats(&self) -> Result<StoreStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_selector_one_becomes_single_element_vec() {
        let sel = TagSelector::One("shared".to_string());
        assert_eq!(sel.into_vec(), vec!["shared".to_string()]);
    }

    #[test]
    fn tag_selector_deserializes_from_bare_string_or_array() {
        let one: TagSelector = serde_json::from_str(r#""shared""#).unwrap();
        let many: TagSelector = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(one.into_vec(), vec!["shared".to_string()]);
        assert_eq!(many.into_vec(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn busy_sqlite_error_maps_to_storage_busy() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        assert!(matches!(StorageError::from(err), StorageError::StorageBusy));
    }
}
