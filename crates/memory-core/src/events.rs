//! Store-level event notifications
//!
//! `memory-core` has no dependency on the HTTP/SSE surface, so it notifies
//! interested parties through this minimal [`EventSink`] seam instead.
//! `memory-server::events::EventBus` implements it to fan the event out to
//! SSE subscribers alongside its own bus-internal events (`heartbeat`,
//! `search_completed`, connection lifecycle).

use std::sync::Arc;

/// The subset of bus events a [`crate::storage::Store`] can originate.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    MemoryStored {
        content_hash: String,
        content_preview: String,
        tags: Vec<String>,
        memory_type: Option<String>,
    },
    MemoryDeleted {
        content_hash: String,
        success: bool,
    },
}

/// Receives [`StoreEvent`]s published by a storage backend.
///
/// Implementations must never panic and must not block the caller for long
/// — publishing must never fail the originating store/search operation.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: StoreEvent);
}

/// An [`EventSink`] that discards everything, used when no event bus is
/// attached (e.g. a bare embedded store with no server running alongside).
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event: StoreEvent) {}
}

pub fn null_sink() -> Arc<dyn EventSink> {
    Arc::new(NullEventSink)
}
