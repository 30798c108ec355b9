//! Export / import
//!
//! A file-format contract letting one instance's memories be shipped to
//! another without shared storage. Modeled on `sync/importer.py`: hash-based
//! dedup against the destination store, source tagging, dry-run, and a
//! pre-analysis pass that also flags collisions across input files
//! themselves before anything is written.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::{to_iso, Memory};
use crate::storage::Store;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("reading {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("writing {path:?}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("{0:?} is not a recognised export file")]
    InvalidFormat(PathBuf),

    #[error("malformed JSON in {path:?}: {source}")]
    Json { path: PathBuf, source: serde_json::Error },

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub source_machine: String,
    pub export_timestamp: String,
    pub total_memories: usize,
    pub include_embeddings: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedMemory {
    pub content: String,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub created_at: f64,
    pub updated_at: f64,
    pub memory_type: Option<String>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub export_metadata: ExportMetadata,
    pub memories: Vec<ExportedMemory>,
}

/// Write every memory in `memories` (already filtered by the caller, e.g. by
/// tag) to `path` as a single export document.
pub fn write_export(
    path: &Path,
    memories: &[Memory],
    source_machine: &str,
    include_embeddings: bool,
) -> Result<(), ExportError> {
    let document = ExportDocument {
        export_metadata: ExportMetadata {
            source_machine: source_machine.to_string(),
            export_timestamp: to_iso(Utc::now()),
            total_memories: memories.len(),
            include_embeddings,
        },
        memories: memories
            .iter()
            .map(|m| ExportedMemory {
                content: m.content.clone(),
                content_hash: m.content_hash.clone(),
                tags: m.tags.iter().cloned().collect(),
                created_at: m.created_at,
                updated_at: m.updated_at,
                memory_type: m.memory_type.clone(),
                metadata: m.metadata.clone(),
                export_source: Some(source_machine.to_string()),
                embedding: if include_embeddings { Some(m.embedding.clone()) } else { None },
            })
            .collect(),
    };

    let json = serde_json::to_string_pretty(&document)
        .map_err(|e| ExportError::Json { path: path.to_path_buf(), source: e })?;
    std::fs::write(path, json).map_err(|e| ExportError::Write { path: path.to_path_buf(), source: e })
}

fn read_document(path: &Path) -> Result<ExportDocument, ExportError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ExportError::Read { path: path.to_path_buf(), source: e })?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| ExportError::Json { path: path.to_path_buf(), source: e })?;
    if value.get("export_metadata").is_none() || value.get("memories").is_none() {
        return Err(ExportError::InvalidFormat(path.to_path_buf()));
    }
    serde_json::from_value(value).map_err(|e| ExportError::Json { path: path.to_path_buf(), source: e })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    pub files: usize,
    pub total_memories: usize,
    pub new_memories: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnalysis {
    pub file: PathBuf,
    pub source_machine: String,
    pub export_date: Option<String>,
    pub total_memories: usize,
    pub new_memories: usize,
    pub existing_duplicates: usize,
    pub import_conflicts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConflict {
    pub content_hash: String,
    pub source_machine: String,
    pub conflict_type: &'static str,
}

/// Result of [`analyze_import`]: what an import would do, without doing it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportAnalysis {
    pub files: Vec<FileAnalysis>,
    pub total_memories: usize,
    pub unique_memories: usize,
    pub potential_duplicates: usize,
    pub sources: BTreeMap<String, SourceStats>,
    pub conflicts: Vec<ImportConflict>,
}

/// Inspect `files` against `existing_hashes` without touching the store.
/// Flags both hashes already present at the destination and hashes that
/// collide across the input files themselves.
pub fn analyze_import(files: &[PathBuf], existing_hashes: &HashSet<String>) -> ImportAnalysis {
    let mut analysis = ImportAnalysis::default();
    let mut seen_in_imports: HashSet<String> = HashSet::new();

    for file in files {
        let document = match read_document(file) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("skipping {file:?} during analysis: {e}");
                continue;
            }
        };

        let source_machine = document.export_metadata.source_machine.clone();
        let mut file_analysis = FileAnalysis {
            file: file.clone(),
            source_machine: source_machine.clone(),
            export_date: Some(document.export_metadata.export_timestamp.clone()),
            total_memories: document.memories.len(),
            new_memories: 0,
            existing_duplicates: 0,
            import_conflicts: 0,
        };

        for memory in &document.memories {
            analysis.total_memories += 1;
            if existing_hashes.contains(&memory.content_hash) {
                file_analysis.existing_duplicates += 1;
                analysis.potential_duplicates += 1;
            } else if seen_in_imports.contains(&memory.content_hash) {
                file_analysis.import_conflicts += 1;
                analysis.conflicts.push(ImportConflict {
                    content_hash: memory.content_hash.clone(),
                    source_machine: source_machine.clone(),
                    conflict_type: "duplicate_in_imports",
                });
            } else {
                file_analysis.new_memories += 1;
                analysis.unique_memories += 1;
                seen_in_imports.insert(memory.content_hash.clone());
            }
        }

        let entry = analysis.sources.entry(source_machine).or_default();
        entry.files += 1;
        entry.total_memories += file_analysis.total_memories;
        entry.new_memories += file_analysis.new_memories;

        analysis.files.push(file_analysis);
    }

    analysis
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub files_processed: usize,
    pub total_processed: usize,
    pub imported: usize,
    pub duplicates_skipped: usize,
    pub errors: usize,
    pub dry_run: bool,
}

/// Import `files` into `store`. When `deduplicate`, skips any memory whose
/// hash is already present (checked incrementally across files, so a memory
/// that appears in two input files is imported once). When `add_source_tags`,
/// appends `source:<origin>` to the tag set and records provenance in
/// `metadata.import_info`. `dry_run` counts without writing.
pub async fn import_from_json(
    store: &Arc<dyn Store>,
    files: &[PathBuf],
    mut existing_hashes: HashSet<String>,
    deduplicate: bool,
    add_source_tags: bool,
    dry_run: bool,
) -> ImportStats {
    let mut stats = ImportStats { dry_run, ..Default::default() };

    for file in files {
        let document = match read_document(file) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::error!("error processing {file:?}: {e}");
                stats.errors += 1;
                continue;
            }
        };

        let source_machine = document.export_metadata.source_machine.clone();
        stats.total_processed += document.memories.len();

        for exported in document.memories {
            if exported.content_hash.is_empty() {
                tracing::warn!("memory missing content_hash in {file:?}, skipping");
                continue;
            }

            if deduplicate && existing_hashes.contains(&exported.content_hash) {
                stats.duplicates_skipped += 1;
                continue;
            }

            let memory = memory_from_export(exported.clone(), &source_machine, add_source_tags, file);

            if !dry_run {
                if let Err(e) = store.store(memory).await {
                    tracing::error!("error storing imported memory: {e}");
                    stats.errors += 1;
                    continue;
                }
            }

            existing_hashes.insert(exported.content_hash);
            stats.imported += 1;
        }

        stats.files_processed += 1;
    }

    stats
}

fn memory_from_export(
    exported: ExportedMemory,
    source_machine: &str,
    add_source_tags: bool,
    source_file: &Path,
) -> Memory {
    let mut tags: std::collections::BTreeSet<String> = exported.tags.into_iter().collect();
    let source_tag = format!("source:{source_machine}");
    if add_source_tags {
        tags.insert(source_tag);
    }

    let mut metadata = exported.metadata;
    let mut import_info = Map::new();
    import_info.insert("imported_at".to_string(), Value::String(to_iso(Utc::now())));
    import_info.insert("source_machine".to_string(), Value::String(source_machine.to_string()));
    import_info.insert("source_file".to_string(), Value::String(source_file.display().to_string()));
    metadata.insert("import_info".to_string(), Value::Object(import_info));

    Memory {
        content: exported.content,
        content_hash: exported.content_hash,
        tags,
        memory_type: exported.memory_type,
        metadata,
        embedding: exported.embedding.unwrap_or_default(),
        created_at: exported.created_at,
        created_at_iso: epoch_to_iso(exported.created_at),
        updated_at: exported.updated_at,
        updated_at_iso: epoch_to_iso(exported.updated_at),
    }
}

fn epoch_to_iso(seconds: f64) -> String {
    chrono::DateTime::from_timestamp(seconds as i64, 0)
        .map(|dt| to_iso(dt.with_timezone(&Utc)))
        .unwrap_or_else(|| to_iso(Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_memory(content: &str) -> Memory {
        Memory::new(content.to_string(), BTreeSet::new(), None, Map::new(), Vec::new())
    }

    #[test]
    fn write_then_read_round_trips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        let memories = vec![sample_memory("hello world")];

        write_export(&path, &memories, "laptop", false).unwrap();
        let document = read_document(&path).unwrap();

        assert_eq!(document.export_metadata.source_machine, "laptop");
        assert_eq!(document.memories.len(), 1);
        assert_eq!(document.memories[0].content, "hello world");
        assert!(document.memories[0].embedding.is_none());
    }

    #[test]
    fn analysis_flags_cross_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let shared = sample_memory("shared content");

        let file_a = dir.path().join("a.json");
        let file_b = dir.path().join("b.json");
        write_export(&file_a, &[shared.clone()], "alpha", false).unwrap();
        write_export(&file_b, &[shared], "beta", false).unwrap();

        let analysis = analyze_import(&[file_a, file_b], &HashSet::new());

        assert_eq!(analysis.total_memories, 2);
        assert_eq!(analysis.unique_memories, 1);
        assert_eq!(analysis.conflicts.len(), 1);
        assert_eq!(analysis.conflicts[0].conflict_type, "duplicate_in_imports");
    }

    #[test]
    fn analysis_counts_existing_duplicates_separately_from_import_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let memory = sample_memory("already there");
        let hash = memory.content_hash.clone();
        let file = dir.path().join("export.json");
        write_export(&file, &[memory], "alpha", false).unwrap();

        let mut existing = HashSet::new();
        existing.insert(hash);

        let analysis = analyze_import(&[file], &existing);
        assert_eq!(analysis.potential_duplicates, 1);
        assert_eq!(analysis.unique_memories, 0);
        assert!(analysis.conflicts.is_empty());
    }
}
