//! Process-wide configuration
//!
//! Read once at startup from the environment variables in the external
//! interfaces table; nothing here is re-read during a request.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    SqliteVec,
    Cloud,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,
    pub database_path: PathBuf,
    pub backups_path: PathBuf,
    pub embedding_model_name: String,
    pub use_portable_runtime: bool,
    pub http_host: String,
    pub http_port: u16,
    pub http_auto_start: bool,
    pub http_client_hostname: Option<String>,
    pub cors_origins: Vec<String>,
    pub include_hostname: bool,
    pub mdns_enabled: bool,
    pub sse_heartbeat_interval: Duration,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "mcp_memory")
}

fn default_database_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("memories.db"))
        .unwrap_or_else(|| PathBuf::from("memories.db"))
}

fn default_backups_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"))
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some(v) if v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_flag(name: &str) -> bool {
    parse_flag(std::env::var(name).ok().as_deref())
}

impl Config {
    /// Build configuration from the environment, falling back to
    /// platform-appropriate defaults for anything unset.
    pub fn from_env() -> Self {
        let storage_backend = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("cloud") => StorageBackend::Cloud,
            _ => StorageBackend::SqliteVec,
        };

        let database_path = std::env::var("DATABASE_PATH").map(PathBuf::from).unwrap_or_else(|_| default_database_path());
        let backups_path = std::env::var("BACKUPS_PATH").map(PathBuf::from).unwrap_or_else(|_| default_backups_path());

        let embedding_model_name = std::env::var("EMBEDDING_MODEL_NAME")
            .unwrap_or_else(|_| "sentence-transformers/all-MiniLM-L6-v2".to_string());

        let http_host = std::env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let http_port = std::env::var("HTTP_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8000);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let sse_heartbeat_interval = std::env::var("SSE_HEARTBEAT_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        Self {
            storage_backend,
            database_path,
            backups_path,
            embedding_model_name,
            use_portable_runtime: env_flag("USE_PORTABLE_RUNTIME"),
            http_host,
            http_port,
            http_auto_start: env_flag("HTTP_AUTO_START"),
            http_client_hostname: std::env::var("HTTP_CLIENT_HOSTNAME").ok(),
            cors_origins,
            include_hostname: env_flag("INCLUDE_HOSTNAME"),
            mdns_enabled: env_flag("MDNS_ENABLED"),
            sse_heartbeat_interval,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_one_and_true_case_insensitively() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("True")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn bind_addr_combines_host_and_port() {
        let mut config = Config::from_env();
        config.http_host = "127.0.0.1".to_string();
        config.http_port = 9000;
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }
}
