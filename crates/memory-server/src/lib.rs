//! # memory-server
//!
//! Process coordination, HTTP/SSE surface, and optional discovery built on
//! top of `memory-core`'s embedded [`memory_core::storage::Store`].
//!
//! - [`config`] — environment-derived [`config::Config`], read once at startup.
//! - [`events`] — [`events::EventBus`], the SSE fan-out hub.
//! - [`http`] — the axum `Router` and its handlers.
//! - [`discovery`] — mDNS advertise/browse.

pub mod config;
pub mod discovery;
pub mod events;
pub mod http;

pub use config::Config;
pub use events::EventBus;
pub use http::{build_router, AppState};
