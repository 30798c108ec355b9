//! S5: natural-language recall. The time parser extracts a window from the
//! query text; the remainder becomes the semantic sub-query; the combined
//! hybrid search stays within both constraints.

mod common;

use std::collections::BTreeSet;

use memory_core::{parse_time_expression, Memory, Store};
use serde_json::Map;

#[tokio::test]
async fn last_week_window_is_extracted_and_query_is_cleaned() {
    let (start, end, cleaned) = parse_time_expression("memories about databases from last week");
    assert!(start.is_some());
    assert!(end.is_some());
    assert_eq!(cleaned.trim(), "memories about databases");

    let span_days = (end.unwrap() - start.unwrap()) / 86_400.0;
    assert!((span_days - 7.0).abs() < 1.0, "expected roughly a 7 day window, got {span_days}");
}

#[tokio::test]
async fn combined_hybrid_search_respects_both_constraints() {
    let store = common::open_test_store();
    let now = chrono::Utc::now();

    // Two memories about databases: one within the last week, one a month old.
    let recent = Memory::new(
        "notes about databases and query planners".to_string(),
        BTreeSet::new(),
        None,
        Map::new(),
        Vec::new(),
    );
    let mut recent = recent;
    recent.created_at = (now - chrono::Duration::days(2)).timestamp() as f64;
    recent.updated_at = recent.created_at;
    let recent_hash = store.store(recent).await.unwrap().content_hash;

    let old = Memory::new(
        "more notes about databases from a while back".to_string(),
        BTreeSet::new(),
        None,
        Map::new(),
        Vec::new(),
    );
    let mut old = old;
    old.created_at = (now - chrono::Duration::days(40)).timestamp() as f64;
    old.updated_at = old.created_at;
    store.store(old).await.unwrap();

    // An unrelated, recent memory that should not match the semantic half.
    let unrelated = Memory::new("the weather was pleasant today".to_string(), BTreeSet::new(), None, Map::new(), Vec::new());
    let mut unrelated = unrelated;
    unrelated.created_at = (now - chrono::Duration::days(1)).timestamp() as f64;
    unrelated.updated_at = unrelated.created_at;
    store.store(unrelated).await.unwrap();

    let (start, end, cleaned) = parse_time_expression("memories about databases from last week");
    let query = if cleaned.trim().is_empty() { None } else { Some(cleaned.as_str()) };
    let results = store.recall(query, 10, start, end).await;

    assert!(results.len() <= 10);
    assert!(results.iter().any(|r| r.memory.content_hash == recent_hash));
    for r in &results {
        assert!(r.memory.created_at >= start.unwrap() && r.memory.created_at <= end.unwrap());
    }
}
