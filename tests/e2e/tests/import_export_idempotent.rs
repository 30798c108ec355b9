//! Invariant 3: importing the same export file twice with deduplication
//! enabled leaves the destination store in the same state as importing it
//! once.

mod common;

use std::collections::{BTreeSet, HashSet};

use memory_core::{export, Memory, Store};
use serde_json::Map;

#[tokio::test]
async fn reimporting_the_same_file_is_a_no_op() {
    let store = common::open_test_store();
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(store);

    let source = common::open_test_store();
    let memories = vec![
        Memory::new("first memory".to_string(), BTreeSet::from(["a".to_string()]), None, Map::new(), Vec::new()),
        Memory::new("second memory".to_string(), BTreeSet::from(["b".to_string()]), None, Map::new(), Vec::new()),
    ];
    for m in &memories {
        source.store(m.clone()).await.unwrap();
    }
    let all: Vec<Memory> = memories.clone();

    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("export.json");
    export::write_export(&export_path, &all, "test-machine", false).unwrap();

    let files = vec![export_path];

    let existing: HashSet<String> = HashSet::new();
    let first = export::import_from_json(&store, &files, existing, true, true, false).await;
    assert_eq!(first.imported, 2);
    assert_eq!(first.duplicates_skipped, 0);

    let stats_after_first = store.stats().await.unwrap();
    assert_eq!(stats_after_first.total_memories, 2);

    let existing_after: HashSet<String> = all.iter().map(|m| m.content_hash.clone()).collect();
    let second = export::import_from_json(&store, &files, existing_after, true, true, false).await;
    assert_eq!(second.imported, 0);
    assert_eq!(second.duplicates_skipped, 2);

    let stats_after_second = store.stats().await.unwrap();
    assert_eq!(stats_after_second.total_memories, stats_after_first.total_memories);
}

#[tokio::test]
async fn analysis_flags_cross_file_duplicates_before_importing() {
    let dir = tempfile::tempdir().unwrap();

    let memory = Memory::new("shared across files".to_string(), BTreeSet::new(), None, Map::new(), Vec::new());
    let path_a = dir.path().join("a.json");
    let path_b = dir.path().join("b.json");
    export::write_export(&path_a, std::slice::from_ref(&memory), "machine-a", false).unwrap();
    export::write_export(&path_b, std::slice::from_ref(&memory), "machine-b", false).unwrap();

    let analysis = export::analyze_import(&[path_a, path_b], &HashSet::new());
    assert_eq!(analysis.total_memories, 2);
    assert_eq!(analysis.unique_memories, 1);
    assert!(!analysis.conflicts.is_empty());
    assert!(analysis.conflicts.iter().all(|c| c.conflict_type == "duplicate_in_imports"));
}
