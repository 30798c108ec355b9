//! In-process event bus with SSE fan-out
//!
//! Implements [`memory_core::events::EventSink`] so the embedded store's
//! `memory_stored`/`memory_deleted` notifications flow straight onto the
//! bus alongside bus-internal events (`search_completed`, `heartbeat`,
//! connection lifecycle). Fan-out is non-blocking: a subscriber whose queue
//! is full is dropped rather than stalling the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use memory_core::events::{EventSink, StoreEvent};
use serde::Serialize;
use tokio::sync::mpsc;

/// Per-subscriber queue depth before the bus drops that subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

fn next_event_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("evt-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// One message on the bus. `id` and `timestamp` are always assigned here,
/// never by the originating caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    MemoryStored {
        id: String,
        timestamp: String,
        content_hash: String,
        content_preview: String,
        tags: Vec<String>,
        memory_type: Option<String>,
    },
    MemoryDeleted {
        id: String,
        timestamp: String,
        content_hash: String,
        success: bool,
    },
    SearchCompleted {
        id: String,
        timestamp: String,
        query: String,
        search_type: String,
        results_count: usize,
        processing_time_ms: u64,
    },
    HealthUpdate {
        id: String,
        timestamp: String,
        status: String,
        details: serde_json::Value,
    },
    Heartbeat {
        id: String,
        timestamp: String,
        active_connections: usize,
        server_status: String,
    },
    ConnectionEstablished {
        id: String,
        timestamp: String,
        heartbeat_interval_secs: u64,
    },
    ConnectionClosed {
        id: String,
        timestamp: String,
        duration_secs: f64,
    },
}

impl BusEvent {
    fn memory_stored(content_hash: String, content_preview: String, tags: Vec<String>, memory_type: Option<String>) -> Self {
        BusEvent::MemoryStored { id: next_event_id(), timestamp: now_iso(), content_hash, content_preview, tags, memory_type }
    }

    fn memory_deleted(content_hash: String, success: bool) -> Self {
        BusEvent::MemoryDeleted { id: next_event_id(), timestamp: now_iso(), content_hash, success }
    }

    pub fn search_completed(query: String, search_type: String, results_count: usize, processing_time_ms: u64) -> Self {
        BusEvent::SearchCompleted { id: next_event_id(), timestamp: now_iso(), query, search_type, results_count, processing_time_ms }
    }

    pub fn health_update(status: String, details: serde_json::Value) -> Self {
        BusEvent::HealthUpdate { id: next_event_id(), timestamp: now_iso(), status, details }
    }

    fn heartbeat(active_connections: usize) -> Self {
        BusEvent::Heartbeat { id: next_event_id(), timestamp: now_iso(), active_connections, server_status: "ok".to_string() }
    }

    fn connection_established(heartbeat_interval_secs: u64) -> Self {
        BusEvent::ConnectionEstablished { id: next_event_id(), timestamp: now_iso(), heartbeat_interval_secs }
    }

    fn connection_closed(duration_secs: f64) -> Self {
        BusEvent::ConnectionClosed { id: next_event_id(), timestamp: now_iso(), duration_secs }
    }
}

struct ConnectionInfo {
    client_ip: String,
    user_agent: String,
    connected_at: Instant,
    last_activity: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStat {
    pub id: u64,
    pub client_ip: String,
    pub user_agent: String,
    pub connected_duration_secs: f64,
    pub last_activity_age_secs: f64,
}

/// Process-local publish/subscribe hub behind the SSE endpoint.
pub struct EventBus {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<BusEvent>>>,
    connections: Mutex<HashMap<u64, ConnectionInfo>>,
    next_subscriber_id: AtomicU64,
    heartbeat_interval: Duration,
}

impl EventBus {
    pub fn new(heartbeat_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            heartbeat_interval,
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Register a new SSE connection, broadcasting `connection_established`
    /// immediately to the new subscriber (and everyone else, per the bus's
    /// normal fan-out).
    pub fn subscribe(&self, client_ip: String, user_agent: String) -> (u64, mpsc::Receiver<BusEvent>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let now = Instant::now();
        self.subscribers.lock().expect("subscribers mutex poisoned").insert(id, tx.clone());
        self.connections.lock().expect("connections mutex poisoned").insert(
            id,
            ConnectionInfo { client_ip, user_agent, connected_at: now, last_activity: now },
        );

        let established = BusEvent::connection_established(self.heartbeat_interval.as_secs());
        let _ = tx.try_send(established);

        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().expect("subscribers mutex poisoned").remove(&id);
        if let Some(info) = self.connections.lock().expect("connections mutex poisoned").remove(&id) {
            let duration = info.connected_at.elapsed().as_secs_f64();
            self.broadcast(BusEvent::connection_closed(duration));
        }
    }

    /// Fan `event` out to every subscriber. A subscriber whose queue is full
    /// (or whose receiver has been dropped) is removed and logged, never
    /// allowed to block this call.
    pub fn broadcast(&self, event: BusEvent) {
        let ids: Vec<u64> = {
            let subs = self.subscribers.lock().expect("subscribers mutex poisoned");
            subs.keys().copied().collect()
        };

        let mut dead = Vec::new();
        for id in ids {
            let sent = {
                let subs = self.subscribers.lock().expect("subscribers mutex poisoned");
                subs.get(&id).map(|tx| tx.try_send(event.clone()))
            };
            match sent {
                Some(Ok(())) => {
                    if let Some(info) = self.connections.lock().expect("connections mutex poisoned").get_mut(&id) {
                        info.last_activity = Instant::now();
                    }
                }
                Some(Err(_)) | None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscribers.lock().expect("subscribers mutex poisoned");
            for id in &dead {
                tracing::warn!("dropping SSE subscriber {id}: queue full or receiver gone");
                subs.remove(id);
            }
        }
    }

    pub fn publish_search_completed(&self, query: &str, search_type: &str, results_count: usize, processing_time_ms: u64) {
        self.broadcast(BusEvent::search_completed(
            query.to_string(),
            search_type.to_string(),
            results_count,
            processing_time_ms,
        ));
    }

    pub fn active_connections(&self) -> usize {
        self.subscribers.lock().expect("subscribers mutex poisoned").len()
    }

    pub fn stats(&self) -> Vec<ConnectionStat> {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .iter()
            .map(|(id, info)| ConnectionStat {
                id: *id,
                client_ip: info.client_ip.clone(),
                user_agent: info.user_agent.clone(),
                connected_duration_secs: info.connected_at.elapsed().as_secs_f64(),
                last_activity_age_secs: info.last_activity.elapsed().as_secs_f64(),
            })
            .collect()
    }

    /// Wakes every `heartbeat_interval`, broadcasting `heartbeat`. The only
    /// time-driven behaviour the bus has.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(bus.heartbeat_interval).await;
                let active = bus.active_connections();
                bus.broadcast(BusEvent::heartbeat(active));
            }
        });
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: StoreEvent) {
        match event {
            StoreEvent::MemoryStored { content_hash, content_preview, tags, memory_type } => {
                self.broadcast(BusEvent::memory_stored(content_hash, content_preview, tags, memory_type));
            }
            StoreEvent::MemoryDeleted { content_hash, success } => {
                self.broadcast(BusEvent::memory_deleted(content_hash, success));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_connection_established_immediately() {
        let bus = EventBus::new(Duration::from_secs(30));
        let (_id, mut rx) = bus.subscribe("127.0.0.1".to_string(), "test-agent".to_string());
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, BusEvent::ConnectionEstablished { heartbeat_interval_secs: 30, .. }));
    }

    #[tokio::test]
    async fn store_event_reaches_subscriber_as_bus_event() {
        let bus = EventBus::new(Duration::from_secs(30));
        let (_id, mut rx) = bus.subscribe("127.0.0.1".to_string(), "test-agent".to_string());
        let _ = rx.recv().await; // drain connection_established

        bus.publish(StoreEvent::MemoryStored {
            content_hash: "abc123".to_string(),
            content_preview: "hello".to_string(),
            tags: vec!["note".to_string()],
            memory_type: None,
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BusEvent::MemoryStored { content_hash, .. } if content_hash == "abc123"));
    }

    #[tokio::test]
    async fn full_subscriber_queue_is_dropped_not_blocked() {
        let bus = EventBus::new(Duration::from_secs(30));
        let (id, mut rx) = bus.subscribe("127.0.0.1".to_string(), "agent".to_string());
        let _ = rx.recv().await;

        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY + 10) {
            bus.broadcast(BusEvent::heartbeat(1));
        }

        assert!(!bus.subscribers.lock().unwrap().contains_key(&id));
    }

    #[tokio::test]
    async fn unsubscribe_broadcasts_connection_closed_to_remaining_subscribers() {
        let bus = EventBus::new(Duration::from_secs(30));
        let (id_a, mut rx_a) = bus.subscribe("1.1.1.1".to_string(), "a".to_string());
        let (id_b, mut rx_b) = bus.subscribe("2.2.2.2".to_string(), "b".to_string());
        let _ = rx_a.recv().await;
        let _ = rx_b.recv().await; // each gets their own connection_established
        let _ = rx_a.recv().await; // rx_a also sees b's connection_established

        bus.unsubscribe(id_b);
        let event = rx_a.recv().await.unwrap();
        assert!(matches!(event, BusEvent::ConnectionClosed { .. }));
        let _ = id_a;
    }
}
