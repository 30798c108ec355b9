//! Server-sent events transport
//!
//! Each connection gets `connection_established` immediately (carrying the
//! heartbeat interval so clients can tune their own dead-peer detection).
//! When no event has gone out for 60 s, a `ping` comment frame is sent to
//! defeat intermediate idle timeouts. `connection_closed` is published when
//! the client disconnects.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};
use serde::Serialize;

use super::AppState;
use crate::events::{ConnectionStat, EventBus};
use std::sync::Arc;

const PING_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Unsubscribes from the bus when the SSE stream is dropped, whether it
/// ends normally or the client disconnects mid-stream.
struct SubscriptionGuard {
    bus: Arc<EventBus>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

fn user_agent(headers: &HeaderMap) -> String {
    headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("unknown").to_string()
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<std::net::SocketAddr>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let client_ip = connect_info.map(|c| c.0.ip().to_string()).unwrap_or_else(|| "unknown".to_string());
    let (id, rx) = state.bus.subscribe(client_ip, user_agent(&headers));
    let guard = SubscriptionGuard { bus: state.bus.clone(), id };

    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        match tokio::time::timeout(PING_IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(event)) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                Some((Ok(Event::default().data(payload)), (rx, guard)))
            }
            Ok(None) => None,
            Err(_elapsed) => Some((Ok(Event::default().comment("ping")), (rx, guard))),
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new())
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    connections: Vec<ConnectionStat>,
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse { connections: state.bus.stats() })
}
