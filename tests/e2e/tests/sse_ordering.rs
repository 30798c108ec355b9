//! S7: SSE correctness. A subscriber sees `connection_established` first,
//! then `memory_stored` for a write that happens afterward, then
//! `heartbeat` events at roughly the configured interval.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use memory_core::{Memory, Store};
use memory_server::events::BusEvent;
use memory_server::EventBus;
use serde_json::Map;

#[tokio::test]
async fn connection_established_then_memory_stored_then_heartbeat() {
    let bus = EventBus::new(Duration::from_millis(50));
    bus.spawn_heartbeat();
    let store = common::open_test_store_with_events(bus.clone());

    let (_id, mut rx) = bus.subscribe("127.0.0.1".to_string(), "e2e-test".to_string());

    let first = rx.recv().await.expect("connection_established");
    assert!(matches!(first, BusEvent::ConnectionEstablished { .. }));

    let memory = Memory::new("hello from the sse test".to_string(), BTreeSet::new(), None, Map::new(), Vec::new());
    let hash = memory.content_hash.clone();
    store.store(memory).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no timeout waiting for memory_stored")
        .expect("channel open");
    match second {
        BusEvent::MemoryStored { content_hash, .. } => assert_eq!(content_hash, hash),
        other => panic!("expected memory_stored, got {other:?}"),
    }

    let third = tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("heartbeat within the 50ms interval plus margin")
        .expect("channel open");
    assert!(matches!(third, BusEvent::Heartbeat { .. }));
}
