//! # memory-core
//!
//! Embedded semantic memory engine: a content-hashed store of text memories,
//! each carrying tags, freeform metadata, and an embedding vector, searchable
//! by meaning, tag, or time.
//!
//! - [`memory`] — the [`Memory`] data model and its update/query DTOs.
//! - [`hash`] — deterministic content identity.
//! - [`time_parser`] — natural-language time expression recognition.
//! - [`embeddings`] — the [`EmbeddingProvider`] trait and its two backends.
//! - [`storage`] — the [`Store`] interface and its embedded SQLite + `sqlite-vec`
//!   implementation.
//! - [`events`] — the seam a server process hooks to observe store activity.
//! - [`coordinator`] — decides whether this process opens the database
//!   directly or defers to a sibling process over HTTP.
//! - [`remote`] — the HTTP client half of that decision.
//! - [`export`] — cross-machine JSON export/import with dedup.
//!
//! This crate has no HTTP surface of its own; `memory-server` builds on top
//! of it to add process coordination, the REST/SSE API, and discovery.
//!
//! ```rust,ignore
//! use memory_core::{embeddings::NeuralEmbeddingProvider, storage::{SqliteStore, Store}, Memory};
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let embedding = Arc::new(NeuralEmbeddingProvider::new()?);
//! let store = SqliteStore::open("memories.db".into(), embedding, memory_core::events::null_sink())?;
//!
//! let memory = Memory::new(
//!     "the mitochondria is the powerhouse of the cell".to_string(),
//!     BTreeSet::new(),
//!     Some("fact".to_string()),
//!     serde_json::Map::new(),
//!     Vec::new(),
//! );
//! store.store(memory).await?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod embeddings;
pub mod events;
pub mod export;
pub mod hash;
pub mod memory;
pub mod remote;
pub mod storage;
pub mod time_parser;

pub use embeddings::{
    CachedProvider, EmbeddingError, EmbeddingProvider, NeuralEmbeddingProvider,
};
#[cfg(feature = "portable-runtime")]
pub use embeddings::PortableEmbeddingProvider;

pub use events::{null_sink, EventSink, StoreEvent};
pub use export::{
    analyze_import, import_from_json, write_export, ExportDocument, ExportError, ExportMetadata,
    ExportedMemory, FileAnalysis, ImportAnalysis, ImportConflict, ImportStats, SourceStats,
};
pub use hash::content_hash;
pub use memory::{join_tags, parse_tags, Memory, MemoryQueryResult, MetadataUpdate, TagMatchMode};
pub use remote::{RemoteError, RemoteStore};
pub use storage::{SqliteStore, StorageError, Store, StoreStats, TagSelector};
pub use time_parser::parse_time_expression;

pub use coordinator::{
    detect as detect_mode, CoordinatorConfig, CoordinatorError, Mode, SERVICE_FAMILY_MARKER,
};
