//! S6: coordinator hand-off. Process A opens the database directly and
//! serves it over HTTP. Process B runs mode detection against A's port
//! with auto-start disabled, and is expected to land in client mode: its
//! writes go over the wire and are immediately visible to A's own
//! `Retrieve`.
//!
//! Both "processes" run as tasks in this test binary rather than separate
//! OS processes, but exercise the real network round trip between
//! `memory-core::coordinator`, `memory-core::remote::RemoteStore` and the
//! `memory-server` HTTP surface.

mod common;

use std::sync::Arc;
use std::time::Instant;

use memory_core::coordinator::{self, CoordinatorConfig};
use memory_core::events::null_sink;
use memory_core::Store;
use memory_server::{build_router, AppState, EventBus};

#[tokio::test]
async fn process_b_falls_back_to_remote_store_and_sees_process_a_immediately() {
    let (listener, port) = common::bind_ephemeral().await;

    let store_a = Arc::new(common::open_test_store());
    let bus = EventBus::new(std::time::Duration::from_secs(30));
    let store_for_state: Arc<dyn memory_core::Store> = store_a.clone();
    let state = AppState {
        store: store_for_state,
        bus,
        config: Arc::new(test_config(port)),
        started_at: Instant::now(),
    };
    let router = build_router(state);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    wait_for_health(port).await;

    let config = CoordinatorConfig { port, auto_start: false, database_path: common::test_db_path(), ..Default::default() };
    let (mode, store_b) = coordinator::detect(config, Arc::new(common::KeywordProvider::default()), null_sink())
        .await
        .expect("mode detection");

    assert_eq!(mode, coordinator::Mode::Client);

    let memory = memory_core::Memory::new(
        "written from process b".to_string(),
        Default::default(),
        None,
        Default::default(),
        Vec::new(),
    );
    let hash = memory.content_hash.clone();
    store_b.store(memory).await.expect("store via remote");

    let seen = store_a.get_by_hash(&hash).await.expect("lookup in process a");
    assert!(seen.is_some(), "process a should see the row written through process b's remote store");
}

fn test_config(port: u16) -> memory_server::Config {
    let mut config = memory_server::Config::from_env();
    config.http_port = port;
    config
}

async fn wait_for_health(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{port}/api/health");
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("server on port {port} never became healthy");
}
