//! Embedded SQLite storage
//!
//! Two tables back the store: `memories` (content, hash, tags, metadata,
//! timestamps) and `memory_embeddings`, a `vec0` virtual table from the
//! `sqlite-vec` loadable extension, keyed by the same integer row id as
//! `memories`. See [`Store`] for the operation contract.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::embeddings::EmbeddingProvider;
use crate::events::{EventSink, StoreEvent};
use crate::memory::{
    epoch_seconds, join_tags, parse_tags, to_iso, Memory, MemoryQueryResult, MetadataUpdate,
    TagMatchMode,
};

use super::migrations::apply_migrations;
use super::{Result, Store, StorageError, StoreStats, TagSelector};

static VEC_EXTENSION_REGISTERED: Once = Once::new();

fn register_vec_extension() {
    VEC_EXTENSION_REGISTERED.call_once(|| unsafe {
        let rc = rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
            *const (),
            unsafe extern "C" fn(),
        >(sqlite_vec::sqlite3_vec_init as *const ())));
        if rc != rusqlite::ffi::SQLITE_OK {
            tracing::error!("failed to register sqlite-vec extension, rc={rc}");
        }
    });
}

/// Embedded [`Store`] backed by a SQLite file plus the `sqlite-vec` vector
/// extension. `writer` and `reader` are separate connections so reads can
/// proceed in parallel with WAL active; only one task may hold `writer` at
/// a time.
pub struct SqliteStore {
    writer: Arc<std::sync::Mutex<Connection>>,
    reader: Arc<std::sync::Mutex<Connection>>,
    embedding: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    db_path: PathBuf,
    events: Arc<dyn EventSink>,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `db_path`, locking the
    /// vector table's dimension to `embedding`'s if this is a fresh file.
    pub fn open(
        db_path: PathBuf,
        embedding: Arc<dyn EmbeddingProvider>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        register_vec_extension();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Internal(format!("creating {:?}: {e}", parent)))?;
        }

        let writer_conn = Connection::open(&db_path)?;
        configure_connection(&writer_conn)?;
        apply_migrations(&writer_conn)?;

        let dimension = embedding.dimension();
        ensure_vector_table(&writer_conn, dimension)?;

        let reader_conn = Connection::open(&db_path)?;
        configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Arc::new(std::sync::Mutex::new(writer_conn)),
            reader: Arc::new(std::sync::Mutex::new(reader_conn)),
            embedding,
            dimension,
            db_path,
            events,
        })
    }

    fn publish(&self, event: StoreEvent) {
        self.events.publish(event);
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -10000;
         PRAGMA temp_store = MEMORY;",
    )?;

    if let Ok(extra) = std::env::var("SQLITE_PRAGMAS") {
        for pair in extra.split(',').filter(|s| !s.trim().is_empty()) {
            if let Some((name, value)) = pair.split_once('=') {
                let stmt = format!("PRAGMA {} = {}", name.trim(), value.trim());
                if let Err(e) = conn.execute_batch(&stmt) {
                    tracing::warn!("ignoring invalid SQLITE_PRAGMAS entry {pair:?}: {e}");
                }
            }
        }
    }

    Ok(())
}

fn ensure_vector_table(conn: &Connection, dimension: usize) -> Result<()> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='memory_embeddings'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;

    if !exists {
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE memory_embeddings USING vec0(
                content_embedding FLOAT[{dimension}] distance_metric=cosine
            );"
        ))?;
    }

    Ok(())
}

fn serialize_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Looks up the embedding stored alongside `id`'s row. `memory_embeddings`
/// and `memories` are written in the same transaction in [`Store::store`],
/// so a missing row here means the memory itself doesn't exist either.
fn fetch_embedding(conn: &Connection, id: i64) -> rusqlite::Result<Vec<f32>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT content_embedding FROM memory_embeddings WHERE rowid = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(blob.map(|b| deserialize_vector(&b)).unwrap_or_default())
}

/// Exponential backoff with ±10% jitter: base 100ms, doubling, up to 3
/// retries, matching the write algorithm's retry policy.
fn with_retry<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    use rand::Rng;

    let mut delay_ms = 100u64;
    for attempt in 0..3 {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_or_locked(&e) => {
                if attempt == 2 {
                    return Err(StorageError::StorageBusy);
                }
                let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
                let sleep_ms = (delay_ms as f64 * (1.0 + jitter)).max(0.0) as u64;
                std::thread::sleep(Duration::from_millis(sleep_ms));
                delay_ms *= 2;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StorageError::StorageBusy)
}

fn is_busy_or_locked(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn row_to_memory(
    id: i64,
    content: String,
    content_hash: String,
    tags_raw: String,
    memory_type: Option<String>,
    metadata_json: String,
    created_at: f64,
    updated_at: f64,
    created_at_iso: String,
    updated_at_iso: String,
    embedding: Vec<f32>,
) -> (i64, Memory) {
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_json).unwrap_or_default();
    (
        id,
        Memory {
            content,
            content_hash,
            tags: parse_tags(&tags_raw),
            memory_type,
            metadata,
            embedding,
            created_at,
            created_at_iso,
            updated_at,
            updated_at_iso,
        },
    )
}

fn fetch_memory_row(conn: &Connection, id: i64) -> rusqlite::Result<Option<Memory>> {
    let row = conn
        .query_row(
            "SELECT content, content_hash, tags, memory_type, metadata_json,
                    created_at, updated_at, created_at_iso, updated_at_iso
             FROM memories WHERE id = ?1",
            params![id],
            |row| {
                Ok(row_to_memory(
                    id,
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    vec![],
                )
                .1)
            },
        )
        .optional()?;

    let Some(mut memory) = row else {
        return Ok(None);
    };
    memory.embedding = fetch_embedding(conn, id)?;
    Ok(Some(memory))
}

#[async_trait]
impl Store for SqliteStore {
    async fn store(&self, mut memory: Memory) -> Result<Memory> {
        let writer = self.writer.clone();
        let embedding_provider = self.embedding.clone();

        let stored = tokio::task::spawn_blocking(move || {
            let vector = embedding_provider.embed(&memory.content)?;
            memory.embedding = vector.clone();

            let conn = writer.lock().expect("writer mutex poisoned");

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM memories WHERE content_hash = ?1",
                    params![memory.content_hash],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                return Err(StorageError::DuplicateHash(memory.content_hash.clone()));
            }

            let metadata_json = serde_json::to_string(&memory.metadata)
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            let tags_raw = join_tags(&memory.tags);
            let vector_blob = serialize_vector(&vector);

            let id = with_retry(|| {
                conn.execute(
                    "INSERT INTO memories (
                        content_hash, content, tags, memory_type, metadata_json,
                        created_at, updated_at, created_at_iso, updated_at_iso
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        memory.content_hash,
                        memory.content,
                        tags_raw,
                        memory.memory_type,
                        metadata_json,
                        memory.created_at,
                        memory.updated_at,
                        memory.created_at_iso,
                        memory.updated_at_iso,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })?;

            with_retry(|| {
                conn.execute(
                    "INSERT INTO memory_embeddings (rowid, content_embedding) VALUES (?1, ?2)",
                    params![id, vector_blob],
                )
            })?;

            Ok(memory)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))??;

        self.publish(StoreEvent::MemoryStored {
            content_hash: stored.content_hash.clone(),
            content_preview: stored.content_preview(100),
            tags: stored.tags.iter().cloned().collect(),
            memory_type: stored.memory_type.clone(),
        });
        Ok(stored)
    }

    async fn retrieve(&self, query: &str, n: usize) -> Vec<MemoryQueryResult> {
        self.recall(Some(query), n, None, None).await
    }

    async fn recall(
        &self,
        query: Option<&str>,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<MemoryQueryResult> {
        match self.recall_inner(query, n, start, end).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("recall failed, returning empty results: {e}");
                vec![]
            }
        }
    }

    async fn search_by_tag(&self, tags: &[String], mode: TagMatchMode) -> Result<Vec<Memory>> {
        if tags.is_empty() {
            return Err(StorageError::InvalidArgument("tags must not be empty".into()));
        }

        let reader = self.reader.clone();
        let wanted: BTreeSet<String> = tags.iter().cloned().collect();

        tokio::task::spawn_blocking(move || {
            let conn = reader.lock().expect("reader mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, content, content_hash, tags, memory_type, metadata_json,
                        created_at, updated_at, created_at_iso, updated_at_iso
                 FROM memories",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok(row_to_memory(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    vec![],
                ))
            })?;

            let mut matched = Vec::new();
            for row in rows {
                let (id, mut memory) = row?;
                memory.embedding = fetch_embedding(&conn, id)?;
                let matches = match mode {
                    TagMatchMode::Any => memory.tags.iter().any(|t| wanted.contains(t)),
                    TagMatchMode::All => wanted.iter().all(|t| memory.tags.contains(t)),
                };
                if matches {
                    matched.push(memory);
                }
            }
            Ok(matched)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Memory>> {
        let reader = self.reader.clone();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = reader.lock().expect("reader mutex poisoned");
            let row: Option<(i64, Memory)> = conn
                .query_row(
                    "SELECT id, content, content_hash, tags, memory_type, metadata_json,
                            created_at, updated_at, created_at_iso, updated_at_iso
                     FROM memories WHERE content_hash = ?1",
                    params![hash],
                    |row| {
                        Ok(row_to_memory(
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                            vec![],
                        ))
                    },
                )
                .optional()?;

            match row {
                Some((id, mut memory)) => {
                    memory.embedding = fetch_embedding(&conn, id)?;
                    Ok(Some(memory))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn update_metadata(
        &self,
        hash: &str,
        update: MetadataUpdate,
        preserve_created_at: bool,
    ) -> Result<Memory> {
        let writer = self.writer.clone();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = writer.lock().expect("writer mutex poisoned");

            let id: i64 = conn
                .query_row(
                    "SELECT id FROM memories WHERE content_hash = ?1",
                    params![hash],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StorageError::NotFound(hash.clone()))?;

            let mut memory = fetch_memory_row(&conn, id)?
                .ok_or_else(|| StorageError::NotFound(hash.clone()))?;

            update.apply(&mut memory, preserve_created_at);

            let metadata_json = serde_json::to_string(&memory.metadata)
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            let tags_raw = join_tags(&memory.tags);

            with_retry(|| {
                conn.execute(
                    "UPDATE memories SET tags = ?1, memory_type = ?2, metadata_json = ?3,
                        created_at = ?4, updated_at = ?5, created_at_iso = ?6, updated_at_iso = ?7
                     WHERE id = ?8",
                    params![
                        tags_raw,
                        memory.memory_type,
                        metadata_json,
                        memory.created_at,
                        memory.updated_at,
                        memory.created_at_iso,
                        memory.updated_at_iso,
                        id,
                    ],
                )
            })?;

            Ok(memory)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let writer = self.writer.clone();
        let hash_owned = hash.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let conn = writer.lock().expect("writer mutex poisoned");

            let id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM memories WHERE content_hash = ?1",
                    params![hash_owned],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = id else {
                return Err(StorageError::NotFound(hash_owned));
            };

            with_retry(|| conn.execute("DELETE FROM memory_embeddings WHERE rowid = ?1", params![id]))?;
            with_retry(|| conn.execute("DELETE FROM memories WHERE id = ?1", params![id]))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?;

        self.publish(StoreEvent::MemoryDeleted {
            content_hash: hash.to_string(),
            success: result.is_ok(),
        });
        result
    }

    async fn delete_by_tag(&self, tags: TagSelector) -> Result<usize> {
        let tags = tags.into_vec();
        self.delete_matching(move |memory_tags: &BTreeSet<String>| {
            tags.iter().any(|t| memory_tags.contains(t))
        })
        .await
    }

    async fn delete_by_all_tags(&self, tags: &[String]) -> Result<usize> {
        let tags: Vec<String> = tags.to_vec();
        self.delete_matching(move |memory_tags: &BTreeSet<String>| {
            tags.iter().all(|t| memory_tags.contains(t))
        })
        .await
    }

    async fn delete_by_time_range(&self, start: f64, end: f64, tag: Option<&str>) -> Result<usize> {
        let writer = self.writer.clone();
        let tag = tag.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let conn = writer.lock().expect("writer mutex poisoned");

            let mut stmt = conn.prepare(
                "SELECT id, tags FROM memories WHERE created_at BETWEEN ?1 AND ?2",
            )?;
            let ids: Vec<i64> = stmt
                .query_map(params![start, end], |row| {
                    let id: i64 = row.get(0)?;
                    let tags_raw: String = row.get(1)?;
                    Ok((id, tags_raw))
                })?
                .filter_map(|r| r.ok())
                .filter(|(_, tags_raw)| match &tag {
                    Some(t) => parse_tags(tags_raw).contains(t),
                    None => true,
                })
                .map(|(id, _)| id)
                .collect();
            drop(stmt);

            for id in &ids {
                with_retry(|| conn.execute("DELETE FROM memory_embeddings WHERE rowid = ?1", params![id]))?;
                with_retry(|| conn.execute("DELETE FROM memories WHERE id = ?1", params![id]))?;
            }

            Ok(ids.len())
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn cleanup_duplicates(&self) -> Result<usize> {
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || {
            let conn = writer.lock().expect("writer mutex poisoned");

            let mut stmt = conn.prepare(
                "SELECT id FROM memories m
                 WHERE id NOT IN (
                    SELECT MIN(id) FROM memories GROUP BY content_hash
                 )",
            )?;
            let duplicate_ids: Vec<i64> = stmt
                .query_map([], |row| row.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            for id in &duplicate_ids {
                with_retry(|| conn.execute("DELETE FROM memory_embeddings WHERE rowid = ?1", params![id]))?;
                with_retry(|| conn.execute("DELETE FROM memories WHERE id = ?1", params![id]))?;
            }

            Ok(duplicate_ids.len())
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn stats(&self) -> Result<StoreStats> {
        let reader = self.reader.clone();
        let db_path = self.db_path.clone();
        let model_name = self.embedding.model_name().to_string();
        let dimension = self.dimension;

        tokio::task::spawn_blocking(move || {
            let conn = reader.lock().expect("reader mutex poisoned");

            let total_memories: i64 =
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;

            let mut stmt = conn.prepare("SELECT tags FROM memories")?;
            let tag_strings: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            let unique_tags: BTreeSet<String> =
                tag_strings.iter().flat_map(|s| parse_tags(s)).collect();

            let database_size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

            Ok(StoreStats {
                total_memories,
                unique_tags: unique_tags.len() as i64,
                database_size_bytes,
                embedding_model: model_name,
                embedding_dimension: dimension,
            })
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }
}

impl SqliteStore {
    async fn delete_matching(&self, predicate: impl Fn(&BTreeSet<String>) -> bool + Send + 'static) -> Result<usize> {
        let writer = self.writer.clone();

        tokio::task::spawn_blocking(move || {
            let conn = writer.lock().expect("writer mutex poisoned");

            let mut stmt = conn.prepare("SELECT id, tags FROM memories")?;
            let ids: Vec<i64> = stmt
                .query_map([], |row| {
                    let id: i64 = row.get(0)?;
                    let tags_raw: String = row.get(1)?;
                    Ok((id, tags_raw))
                })?
                .filter_map(|r| r.ok())
                .filter(|(_, tags_raw)| predicate(&parse_tags(tags_raw)))
                .map(|(id, _)| id)
                .collect();
            drop(stmt);

            for id in &ids {
                with_retry(|| conn.execute("DELETE FROM memory_embeddings WHERE rowid = ?1", params![id]))?;
                with_retry(|| conn.execute("DELETE FROM memories WHERE id = ?1", params![id]))?;
            }

            Ok(ids.len())
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn recall_inner(
        &self,
        query: Option<&str>,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        match query {
            Some(q) => self.hybrid_query(q, n, start, end).await,
            None => self.time_only_query(n, start, end).await,
        }
    }

    async fn hybrid_query(
        &self,
        query: &str,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        let vector = self.embedding.embed(query)?;
        let vector_blob = serialize_vector(&vector);
        let reader = self.reader.clone();
        let k = n.max(1);

        tokio::task::spawn_blocking(move || {
            let conn = reader.lock().expect("reader mutex poisoned");

            let mut stmt = conn.prepare(
                "SELECT rowid, distance FROM memory_embeddings
                 WHERE content_embedding MATCH ?1 AND k = ?2
                 ORDER BY distance",
            )?;
            let neighbours: Vec<(i64, f64)> = stmt
                .query_map(params![vector_blob, k as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);

            let mut results = Vec::with_capacity(neighbours.len());
            for (id, distance) in neighbours {
                let Some(memory) = fetch_memory_row(&conn, id)? else {
                    continue;
                };

                if let (Some(s), Some(e)) = (start, end) {
                    if memory.created_at < s || memory.created_at > e {
                        continue;
                    }
                }

                let relevance = (1.0 - distance).max(0.0) as f32;
                let mut debug_info = Map::new();
                debug_info.insert("distance".into(), Value::from(distance));
                debug_info.insert("backend".into(), Value::from("sqlite-vec"));

                results.push(MemoryQueryResult {
                    memory,
                    relevance_score: Some(relevance),
                    debug_info,
                });
            }

            results.sort_by(|a, b| {
                b.relevance_score
                    .partial_cmp(&a.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(n);
            Ok(results)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }

    async fn time_only_query(
        &self,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        let reader = self.reader.clone();
        let start = start.unwrap_or(f64::MIN);
        let end = end.unwrap_or(f64::MAX);

        tokio::task::spawn_blocking(move || {
            let conn = reader.lock().expect("reader mutex poisoned");

            let mut stmt = conn.prepare(
                "SELECT id, content, content_hash, tags, memory_type, metadata_json,
                        created_at, updated_at, created_at_iso, updated_at_iso
                 FROM memories
                 WHERE created_at BETWEEN ?1 AND ?2
                 ORDER BY created_at DESC
                 LIMIT ?3",
            )?;

            let rows: Vec<(i64, Memory)> = stmt
                .query_map(params![start, end, n as i64], |row| {
                    Ok(row_to_memory(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        vec![],
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();

            let mut results = Vec::with_capacity(rows.len());
            for (id, mut memory) in rows {
                memory.embedding = fetch_embedding(&conn, id)?;
                results.push(MemoryQueryResult { memory, relevance_score: None, debug_info: Map::new() });
            }
            Ok(results)
        })
        .await
        .map_err(|e| StorageError::Internal(format!("task join error: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;
    use crate::events::null_sink;

    struct FixedProvider;

    impl EmbeddingProvider for FixedProvider {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            // Deterministic toy embedding: character-sum in dim 0, else 0.
            let sum: u32 = text.bytes().map(|b| b as u32).sum();
            let mut v = vec![0.0f32; 4];
            v[0] = (sum % 97) as f32 / 97.0;
            v[1] = 1.0 - v[0];
            crate::embeddings::l2_normalize(&mut v);
            Ok(v)
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "fixed-test-provider"
        }
    }

    async fn open_test_store() -> SqliteStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir); // keep the tempdir alive for the test's duration
        SqliteStore::open(path, Arc::new(FixedProvider), null_sink()).unwrap()
    }

    #[tokio::test]
    async fn store_then_get_by_hash_round_trips() {
        let store = open_test_store().await;
        let memory = Memory::new(
            "Python is a versatile programming language".into(),
            BTreeSet::new(),
            None,
            Map::new(),
            vec![],
        );
        let hash = memory.content_hash.clone();

        let stored = store.store(memory).await.unwrap();
        assert!(!stored.embedding.is_empty(), "store() should fill in the computed embedding");

        let fetched = store.get_by_hash(&hash).await.unwrap();
        assert!(fetched.is_some());
        let fetched = fetched.unwrap();
        assert_eq!(fetched.content_hash, hash);
        assert_eq!(fetched.embedding, stored.embedding, "embedding must round-trip through storage");
    }

    #[tokio::test]
    async fn duplicate_store_is_rejected() {
        let store = open_test_store().await;
        let memory = Memory::new("same content".into(), BTreeSet::new(), None, Map::new(), vec![]);

        store.store(memory.clone()).await.unwrap();
        let second = store.store(memory).await;
        assert!(matches!(second, Err(StorageError::DuplicateHash(_))));
    }

    #[tokio::test]
    async fn delete_by_tag_removes_only_matching_memories() {
        let store = open_test_store().await;

        for (content, tags) in [
            ("one", vec!["tag1", "shared"]),
            ("two", vec!["tag2", "shared"]),
            ("three", vec!["tag3"]),
        ] {
            let memory = Memory::new(
                content.into(),
                tags.into_iter().map(String::from).collect(),
                None,
                Map::new(),
                vec![],
            );
            store.store(memory).await.unwrap();
        }

        let deleted = store
            .delete_by_tag(TagSelector::Many(vec!["shared".into()]))
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_memories, 1);
    }

    #[tokio::test]
    async fn search_by_tag_rejects_empty_list() {
        let store = open_test_store().await;
        let result = store.search_by_tag(&[], TagMatchMode::Any).await;
        assert!(matches!(result, Err(StorageError::InvalidArgument(_))));
    }
}
