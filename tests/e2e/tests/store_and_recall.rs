//! S1 (store + retrieve), S3 (delete by tag OR), S4 (time recall) and the
//! recall-monotonicity / time-filter-correctness invariants, exercised
//! against a real `SqliteStore` rather than the unit-level fixtures in
//! `memory-core`.

mod common;

use std::collections::BTreeSet;

use memory_core::{Memory, Store};
use serde_json::Map;

#[tokio::test]
async fn store_then_retrieve_finds_the_memory_by_relevance() {
    let store = common::open_test_store();

    let memory = Memory::new(
        "Python is a versatile programming language".to_string(),
        BTreeSet::from(["programming".to_string(), "python".to_string()]),
        None,
        Map::new(),
        Vec::new(),
    );
    store.store(memory.clone()).await.unwrap();

    let results = store.retrieve("programming languages", 1).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.content_hash, memory.content_hash);
    assert!(results[0].relevance_score.unwrap_or(0.0) > 0.3);
}

#[tokio::test]
async fn delete_by_tag_removes_only_the_union() {
    let store = common::open_test_store();

    for (content, tags) in [
        ("one", vec!["tag1", "shared"]),
        ("two", vec!["tag2", "shared"]),
        ("three", vec!["tag3"]),
    ] {
        let memory = Memory::new(
            content.to_string(),
            tags.into_iter().map(String::from).collect(),
            None,
            Map::new(),
            Vec::new(),
        );
        store.store(memory).await.unwrap();
    }

    let deleted = store
        .delete_by_tag(memory_core::TagSelector::Many(vec!["shared".to_string()]))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining = store.search_by_tag(&["tag3".to_string()], memory_core::TagMatchMode::Any).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].content, "three");
}

#[tokio::test]
async fn time_recall_returns_exactly_the_window_newest_first() {
    let store = common::open_test_store();

    let now = chrono::Utc::now();
    let mut hashes = Vec::new();
    for days_ago in (0..5).rev() {
        let stamp = now - chrono::Duration::days(days_ago);
        let memory = Memory::new(
            format!("entry from {days_ago} days ago"),
            BTreeSet::new(),
            None,
            Map::new(),
            Vec::new(),
        );
        let mut memory = memory;
        memory.created_at = stamp.timestamp() as f64;
        memory.updated_at = memory.created_at;
        let stored = store.store(memory).await.unwrap();
        hashes.push((days_ago, stored.content_hash));
    }

    let start = (now - chrono::Duration::days(2)).timestamp() as f64;
    let end = now.timestamp() as f64;
    let results = store.recall(None, 3, Some(start), Some(end)).await;

    assert_eq!(results.len(), 3);
    for r in &results {
        assert!(r.relevance_score.is_none());
        assert!(r.memory.created_at >= start && r.memory.created_at <= end);
    }
    // newest first
    for pair in results.windows(2) {
        assert!(pair[0].memory.created_at >= pair[1].memory.created_at);
    }
}

#[tokio::test]
async fn relevance_scores_are_non_increasing_across_results() {
    let store = common::open_test_store();

    for content in [
        "Python is a versatile programming language",
        "databases store structured data",
        "the weather today is sunny",
        "python supports multiple programming paradigms",
    ] {
        let memory = Memory::new(content.to_string(), BTreeSet::new(), None, Map::new(), Vec::new());
        store.store(memory).await.unwrap();
    }

    let results = store.retrieve("python programming", 10).await;
    assert!(!results.is_empty());
    for pair in results.windows(2) {
        let a = pair[0].relevance_score.unwrap_or(0.0);
        let b = pair[1].relevance_score.unwrap_or(0.0);
        assert!(a >= b, "scores must be non-increasing: {a} then {b}");
    }
}
