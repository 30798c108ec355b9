//! Memory module - Core data model
//!
//! A [`Memory`] is the single first-class entity: content addressed by a
//! deterministic [`crate::hash::content_hash`], carrying tags, freeform
//! metadata, and an embedding vector.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hash::content_hash;

/// Metadata keys reserved by [`Memory`] itself; `UpdateMetadata` stores any
/// other top-level key it's given into the `metadata` map instead.
const PROTECTED_METADATA_KEYS: [&str; 4] = ["tags", "memory_type", "created_at", "content_hash"];

/// A stored memory: content plus its content-addressed identity, tags,
/// freeform metadata, and embedding vector.
///
/// `content`, `content_hash`, and `embedding` are immutable after creation;
/// only tags, `memory_type`, and `metadata` may change via
/// [`crate::storage::Store::update_metadata`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub content: String,
    pub content_hash: String,
    pub tags: BTreeSet<String>,
    pub memory_type: Option<String>,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
    /// Seconds since epoch.
    pub created_at: f64,
    pub created_at_iso: String,
    /// Seconds since epoch.
    pub updated_at: f64,
    pub updated_at_iso: String,
}

impl Memory {
    /// Build a new memory whose hash is derived from `content` and
    /// `metadata`, with both timestamps set to now.
    pub fn new(
        content: String,
        tags: BTreeSet<String>,
        memory_type: Option<String>,
        metadata: Map<String, Value>,
        embedding: Vec<f32>,
    ) -> Self {
        let hash = content_hash(&content, Some(&metadata));
        let now = Utc::now();
        let (at, iso) = (epoch_seconds(now), to_iso(now));

        Self {
            content,
            content_hash: hash,
            tags,
            memory_type,
            metadata,
            embedding,
            created_at: at,
            created_at_iso: iso.clone(),
            updated_at: at,
            updated_at_iso: iso,
        }
    }

    /// First `n` characters of `content`, used in event payloads so large
    /// memories don't bloat the event bus.
    pub fn content_preview(&self, n: usize) -> String {
        self.content.chars().take(n).collect()
    }
}

pub(crate) fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp() as f64 + t.timestamp_subsec_nanos() as f64 / 1_000_000_000.0
}

pub(crate) fn to_iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// A [`Memory`] returned from a query, with an optional relevance score
/// (absent for pure time-filtered results) and opaque debug details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQueryResult {
    pub memory: Memory,
    /// Higher is more relevant, in `[0, 1]`. Absent when the query was
    /// purely time-filtered.
    pub relevance_score: Option<f32>,
    pub debug_info: Map<String, Value>,
}

/// Matching mode for [`crate::storage::Store::search_by_tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatchMode {
    /// Union: a memory matches if it has any of the given tags.
    Any,
    /// Intersection: a memory matches only if it has all of the given tags.
    All,
}

/// Sparse update accepted by [`crate::storage::Store::update_metadata`].
///
/// Recognised top-level keys are `tags`, `memory_type`, and `metadata`
/// (merged, not replaced); anything else is folded into the memory's
/// `metadata` map under its own key, provided it doesn't collide with a
/// protected name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub tags: Option<Vec<String>>,
    pub memory_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Catches any key not named above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataUpdate {
    /// Apply this update to `memory` in place, refreshing `updated_at`.
    ///
    /// `content`, `content_hash`, and `embedding` are never touched here.
    pub fn apply(self, memory: &mut Memory, preserve_created_at: bool) {
        if let Some(tags) = self.tags {
            memory.tags = tags.into_iter().collect();
        }
        if let Some(memory_type) = self.memory_type {
            memory.memory_type = Some(memory_type);
        }
        if let Some(metadata) = self.metadata {
            for (k, v) in metadata {
                memory.metadata.insert(k, v);
            }
        }
        for (k, v) in self.extra {
            if !PROTECTED_METADATA_KEYS.contains(&k.as_str()) {
                memory.metadata.insert(k, v);
            }
        }

        let now = Utc::now();
        memory.updated_at = epoch_seconds(now);
        memory.updated_at_iso = to_iso(now);
        if !preserve_created_at {
            memory.created_at = memory.updated_at;
            memory.created_at_iso = memory.updated_at_iso.clone();
        }
    }
}

/// Parse a stored `tags` column into a set, tolerating both the modern
/// comma-joined form and the legacy JSON-array string form.
///
/// Legacy rows are recognised by the literal "starts with `[`, ends with
/// `]`" heuristic, per the original storage format.
pub fn parse_tags(raw: &str) -> BTreeSet<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return BTreeSet::new();
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serialise a tag set to the at-rest comma-joined form.
pub fn join_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_json_array_tags_parse_to_same_set_as_comma_joined() {
        let legacy = parse_tags(r#"["a","b","c"]"#);
        let modern = parse_tags("a,b,c");
        assert_eq!(legacy, modern);
    }

    #[test]
    fn empty_tags_parse_to_empty_set() {
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn round_trip_join_then_parse() {
        let tags: BTreeSet<String> = ["alpha", "beta"].into_iter().map(String::from).collect();
        assert_eq!(parse_tags(&join_tags(&tags)), tags);
    }

    #[test]
    fn new_memory_has_matching_created_and_updated_timestamps() {
        let m = Memory::new("hello".into(), BTreeSet::new(), None, Map::new(), vec![]);
        assert_eq!(m.created_at, m.updated_at);
        assert_eq!(m.created_at_iso, m.updated_at_iso);
    }

    #[test]
    fn metadata_update_merges_rather_than_replaces() {
        let mut m = Memory::new("hello".into(), BTreeSet::new(), None, Map::new(), vec![]);
        m.metadata.insert("existing".into(), json!(1));

        let mut update = MetadataUpdate::default();
        update.metadata = Some(Map::from_iter([("new_key".to_string(), json!(2))]));
        update.apply(&mut m, true);

        assert_eq!(m.metadata.get("existing"), Some(&json!(1)));
        assert_eq!(m.metadata.get("new_key"), Some(&json!(2)));
    }

    #[test]
    fn preserve_created_at_false_resets_created_at() {
        let mut m = Memory::new("hello".into(), BTreeSet::new(), None, Map::new(), vec![]);
        let original_created = m.created_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        MetadataUpdate::default().apply(&mut m, false);

        assert!(m.created_at > original_created);
        assert_eq!(m.created_at, m.updated_at);
    }
}
