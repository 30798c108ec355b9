//! Multi-process coordination
//!
//! Decides, once per process at first [`crate::storage::Store`] access,
//! whether this process should open the database directly or talk to a
//! sibling process's HTTP server. See `utils/port_detection.py` and
//! `utils/http_server_manager.py` in the system this was modeled on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::embeddings::EmbeddingProvider;
use crate::events::EventSink;
use crate::remote::RemoteStore;
use crate::storage::{SqliteStore, Store};

/// A well-known string every instance of this service's `/api/health`
/// response carries, used to recognise "this is the same service family"
/// rather than some unrelated process squatting the port.
pub const SERVICE_FAMILY_MARKER: &str = "memory_service";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    Client,
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("failed to open embedded store: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("auto-started server process never became healthy: {0}")]
    AutoStartTimeout(String),

    #[error("failed to spawn server process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to build remote store client: {0}")]
    Remote(#[from] crate::remote::RemoteError),
}

/// Inputs to mode detection.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Local port to probe and, in auto-start mode, bind.
    pub port: u16,
    /// `HTTP_AUTO_START=1`: spawn a server process when the port is free.
    pub auto_start: bool,
    /// Path to the `memory-server` binary, used only for auto-start.
    pub server_binary: PathBuf,
    /// Database file path, passed to a spawned server via `DATABASE_PATH`.
    pub database_path: PathBuf,
    /// How long to poll `/health` after spawning before giving up.
    pub auto_start_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            auto_start: false,
            server_binary: PathBuf::from("memory-service"),
            database_path: PathBuf::from("memories.db"),
            auto_start_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    service: Option<String>,
}

async fn probe_health(client: &reqwest::Client, port: u16) -> Option<HealthResponse> {
    let url = format!("http://127.0.0.1:{port}/api/health");
    let response = client.get(&url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.json::<HealthResponse>().await.ok()
}

fn is_same_service_family(health: &HealthResponse) -> bool {
    health.service.as_deref() == Some(SERVICE_FAMILY_MARKER)
}

/// Detect the operating mode and construct the corresponding [`Store`].
///
/// 1. Probe `/api/health` on `config.port`. A reachable, same-family
///    response means another process already owns this database: mode =
///    client.
/// 2. Otherwise, if auto-start is enabled, spawn `config.server_binary`
///    detached and poll until it's healthy or `auto_start_timeout` elapses.
/// 3. Otherwise, open the database directly in this process.
pub async fn detect(
    config: CoordinatorConfig,
    embedding: Arc<dyn EmbeddingProvider>,
    events: Arc<dyn EventSink>,
) -> Result<(Mode, Arc<dyn Store>), CoordinatorError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_default();

    if let Some(health) = probe_health(&client, config.port).await {
        if is_same_service_family(&health) {
            tracing::info!("port {} already serves this service, running as client", config.port);
            return Ok((Mode::Client, Arc::new(RemoteStore::new(config.port)?)));
        }
        tracing::warn!(
            "port {} is occupied by an unrelated service, falling back to direct mode",
            config.port
        );
        let store = SqliteStore::open(config.database_path, embedding, events)?;
        return Ok((Mode::Direct, Arc::new(store)));
    }

    if config.auto_start {
        match spawn_and_wait(&config, &client).await {
            Ok(()) => return Ok((Mode::Client, Arc::new(RemoteStore::new(config.port)?))),
            Err(e) => {
                tracing::warn!("auto-start failed, falling back to direct mode: {e}");
            }
        }
    }

    let store = SqliteStore::open(config.database_path.clone(), embedding, events)?;
    Ok((Mode::Direct, Arc::new(store)))
}

async fn spawn_and_wait(config: &CoordinatorConfig, client: &reqwest::Client) -> Result<(), CoordinatorError> {
    tracing::info!("auto-starting server process on port {}", config.port);

    std::process::Command::new(&config.server_binary)
        .arg("server")
        .env("HTTP_PORT", config.port.to_string())
        .env("DATABASE_PATH", &config.database_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let deadline = tokio::time::Instant::now() + config.auto_start_timeout;
    while tokio::time::Instant::now() < deadline {
        if let Some(health) = probe_health(client, config.port).await {
            if is_same_service_family(&health) {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    Err(CoordinatorError::AutoStartTimeout(format!(
        "no healthy response on port {} within {:?}",
        config.port, config.auto_start_timeout
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_marker_requires_explicit_service_name_match() {
        let by_name = HealthResponse {
            status: "ok".into(),
            service: Some(SERVICE_FAMILY_MARKER.to_string()),
        };
        let ok_status_without_name = HealthResponse { status: "ok".into(), service: None };
        let unrelated = HealthResponse { status: "ok".into(), service: Some("other".into()) };

        assert!(is_same_service_family(&by_name));
        assert!(!is_same_service_family(&ok_status_without_name));
        assert!(!is_same_service_family(&unrelated));
    }
}
