//! HTTP client mode of the Store interface
//!
//! [`RemoteStore`] satisfies [`crate::storage::Store`] by translating each
//! operation to the HTTP surface a sibling process's `memory-server`
//! exposes. Bulk-destructive operations have no safe single-request
//! translation and are refused with [`RemoteError::UnsupportedRemote`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::memory::{Memory, MemoryQueryResult, MetadataUpdate, TagMatchMode};
use crate::storage::{Result as StoreResult, Store, StorageError, StoreStats, TagSelector};

const MIN_POOL_SIZE: usize = 5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request to peer failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("peer returned an error: {status} {detail}")]
    Peer { status: u16, detail: String },

    #[error("operation not supported over the remote transport: {0}")]
    UnsupportedRemote(&'static str),
}

impl From<RemoteError> for StorageError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::UnsupportedRemote(op) => {
                StorageError::InvalidArgument(format!("unsupported over remote transport: {op}"))
            }
            other => StorageError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// `Store` implementation backed by a sibling process's HTTP surface.
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteStore {
    pub fn new(port: u16) -> Result<Self, RemoteError> {
        Self::with_base_url(format!("http://127.0.0.1:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MIN_POOL_SIZE)
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url: base_url.into() })
    }

    async fn error_from_response(response: reqwest::Response) -> RemoteError {
        let status = response.status().as_u16();
        let detail = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.detail)
            .unwrap_or_else(|_| "unknown error".to_string());
        RemoteError::Peer { status, detail }
    }
}

#[derive(Debug, Serialize)]
struct StoreRequest<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_type: Option<&'a str>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StoreResponse {
    memory: Memory,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<MemoryQueryResult>,
}

#[derive(Debug, Deserialize)]
struct TagSearchResponse {
    memories: Vec<Memory>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    success: bool,
}

#[async_trait]
impl Store for RemoteStore {
    async fn store(&self, memory: Memory) -> StoreResult<Memory> {
        let body = StoreRequest {
            content: &memory.content,
            tags: memory.tags.iter().cloned().collect(),
            memory_type: memory.memory_type.as_deref(),
            metadata: memory.metadata.clone(),
        };
        let response = self
            .client
            .post(format!("{}/api/memories", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from)?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            return Err(StorageError::DuplicateHash(memory.content_hash.clone()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await.into());
        }
        let parsed: StoreResponse = response.json().await.map_err(RemoteError::from)?;
        Ok(parsed.memory)
    }

    async fn retrieve(&self, query: &str, n: usize) -> Vec<MemoryQueryResult> {
        let body = json!({ "query": query, "n_results": n });
        match self.client.post(format!("{}/api/search", self.base_url)).json(&body).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<SearchResponse>()
                .await
                .map(|r| r.results)
                .unwrap_or_default(),
            Ok(response) => {
                tracing::warn!("remote retrieve failed with status {}", response.status());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("remote retrieve request failed: {e}");
                Vec::new()
            }
        }
    }

    async fn recall(
        &self,
        query: Option<&str>,
        n: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<MemoryQueryResult> {
        let body = json!({
            "query": query,
            "n_results": n,
            "start": start,
            "end": end,
        });
        match self.client.post(format!("{}/api/search/by-time", self.base_url)).json(&body).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<SearchResponse>()
                .await
                .map(|r| r.results)
                .unwrap_or_default(),
            Ok(response) => {
                tracing::warn!("remote recall failed with status {}", response.status());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("remote recall request failed: {e}");
                Vec::new()
            }
        }
    }

    async fn search_by_tag(&self, tags: &[String], mode: TagMatchMode) -> StoreResult<Vec<Memory>> {
        let body = json!({ "tags": tags, "match_all": matches!(mode, TagMatchMode::All) });
        let response = self
            .client
            .post(format!("{}/api/search/by-tag", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from)?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await.into());
        }
        let parsed: TagSearchResponse = response.json().await.map_err(RemoteError::from)?;
        Ok(parsed.memories)
    }

    async fn get_by_hash(&self, hash: &str) -> StoreResult<Option<Memory>> {
        let response = self
            .client
            .get(format!("{}/api/memories/{hash}", self.base_url))
            .send()
            .await
            .map_err(RemoteError::from)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await.into());
        }
        let memory: Memory = response.json().await.map_err(RemoteError::from)?;
        Ok(Some(memory))
    }

    async fn update_metadata(
        &self,
        _hash: &str,
        _update: MetadataUpdate,
        _preserve_created_at: bool,
    ) -> StoreResult<Memory> {
        Err(RemoteError::UnsupportedRemote("update_metadata").into())
    }

    async fn delete(&self, hash: &str) -> StoreResult<()> {
        let response = self
            .client
            .delete(format!("{}/api/memories/{hash}", self.base_url))
            .send()
            .await
            .map_err(RemoteError::from)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(hash.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await.into());
        }
        let parsed: DeleteResponse = response.json().await.map_err(RemoteError::from)?;
        if parsed.success {
            Ok(())
        } else {
            Err(StorageError::Internal("peer reported unsuccessful delete".to_string()))
        }
    }

    async fn delete_by_tag(&self, _tags: TagSelector) -> StoreResult<usize> {
        Err(RemoteError::UnsupportedRemote("delete_by_tag").into())
    }

    async fn delete_by_all_tags(&self, _tags: &[String]) -> StoreResult<usize> {
        Err(RemoteError::UnsupportedRemote("delete_by_all_tags").into())
    }

    async fn delete_by_time_range(&self, _start: f64, _end: f64, _tag: Option<&str>) -> StoreResult<usize> {
        Err(RemoteError::UnsupportedRemote("delete_by_time_range").into())
    }

    async fn cleanup_duplicates(&self) -> StoreResult<usize> {
        Err(RemoteError::UnsupportedRemote("cleanup_duplicates").into())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let response = self
            .client
            .get(format!("{}/api/health/detailed", self.base_url))
            .send()
            .await
            .map_err(RemoteError::from)?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await.into());
        }
        response.json().await.map_err(|e| RemoteError::from(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_destructive_ops_report_unsupported() {
        let err: StorageError = RemoteError::UnsupportedRemote("cleanup_duplicates").into();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn pool_size_constant_meets_contract_minimum() {
        assert!(MIN_POOL_SIZE >= 5);
    }
}
