//! Transport to the remote document store.
//!
//! The store is a flat JSON key-value tree addressed by path: a collection
//! lives at `<collection>.json` and each record at `<collection>/<key>.json`.
//! [`RemoteClient`] hides how requests travel so the engine can be driven by
//! [`HttpRemoteClient`] in production and [`MemoryRemote`] in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Status and raw body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// GET/PUT/DELETE of JSON documents by path.
///
/// Only transport failures are errors. Any HTTP status is returned as a
/// response and left to the caller to interpret.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get(&self, path: &str) -> SyncResult<RemoteResponse>;

    /// Replace the document at `path` with `body`.
    async fn put(&self, path: &str, body: Vec<u8>) -> SyncResult<RemoteResponse>;

    async fn delete(&self, path: &str) -> SyncResult<RemoteResponse>;
}

/// `reqwest`-based client rooted at the configured base URL.
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
}

impl HttpRemoteClient {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<RemoteResponse> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        debug!(status, bytes = body.len(), "remote response");
        Ok(RemoteResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn get(&self, path: &str) -> SyncResult<RemoteResponse> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> SyncResult<RemoteResponse> {
        self.send(
            self.client
                .put(self.url(path))
                .header(CONTENT_TYPE, "application/json")
                .body(body),
        )
        .await
    }

    async fn delete(&self, path: &str) -> SyncResult<RemoteResponse> {
        self.send(self.client.delete(self.url(path))).await
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<String, serde_json::Value>,
    collection_body: Option<Vec<u8>>,
}

/// In-process stand-in for the remote document store, holding one collection.
#[derive(Debug)]
pub struct MemoryRemote {
    collection: String,
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    requests: AtomicUsize,
}

impl MemoryRemote {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            state: Mutex::new(MemoryState::default()),
            offline: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
        }
    }

    /// Store a raw JSON value under `key`, bypassing any validation.
    pub fn insert_raw(&self, key: impl Into<String>, value: serde_json::Value) {
        self.state.lock().records.insert(key.into(), value);
    }

    pub fn record(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Serve `body` verbatim for collection reads instead of the stored records.
    pub fn set_collection_body(&self, body: Option<Vec<u8>>) {
        self.state.lock().collection_body = body;
    }

    /// While offline every request fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests received so far, including failed ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn begin(&self) -> SyncResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("remote is offline".into()));
        }
        Ok(())
    }

    fn record_key<'p>(&self, path: &'p str) -> Option<&'p str> {
        path.trim_start_matches('/')
            .strip_prefix(self.collection.as_str())?
            .strip_prefix('/')?
            .strip_suffix(".json")
            .filter(|k| !k.is_empty() && !k.contains('/'))
    }

    fn is_collection(&self, path: &str) -> bool {
        path.trim_start_matches('/')
            .strip_prefix(self.collection.as_str())
            .is_some_and(|rest| rest == ".json")
    }
}

fn not_found() -> RemoteResponse {
    RemoteResponse::new(404, r#"{"error":"not found"}"#)
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn get(&self, path: &str) -> SyncResult<RemoteResponse> {
        self.begin()?;
        let state = self.state.lock();
        if self.is_collection(path) {
            if let Some(body) = &state.collection_body {
                return Ok(RemoteResponse::new(200, body.clone()));
            }
            // the document store answers `null` for a missing collection
            let body = if state.records.is_empty() {
                b"null".to_vec()
            } else {
                serde_json::to_vec(&state.records).map_err(SyncError::Encode)?
            };
            return Ok(RemoteResponse::new(200, body));
        }
        match self.record_key(path) {
            Some(key) => {
                let value = state
                    .records
                    .get(key)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let body = serde_json::to_vec(&value).map_err(SyncError::Encode)?;
                Ok(RemoteResponse::new(200, body))
            }
            None => Ok(not_found()),
        }
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> SyncResult<RemoteResponse> {
        self.begin()?;
        let Some(key) = self.record_key(path) else {
            return Ok(not_found());
        };
        let value: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => return Ok(RemoteResponse::new(400, r#"{"error":"invalid json"}"#)),
        };
        self.state.lock().records.insert(key.to_string(), value);
        Ok(RemoteResponse::new(200, body))
    }

    async fn delete(&self, path: &str) -> SyncResult<RemoteResponse> {
        self.begin()?;
        let Some(key) = self.record_key(path) else {
            return Ok(not_found());
        };
        self.state.lock().records.remove(key);
        Ok(RemoteResponse::new(200, "null"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn empty_collection_reads_as_null() {
        let remote = MemoryRemote::new("tasks");
        let resp = remote.get("tasks.json").await.unwrap();
        assert_eq!(resp.body, b"null");
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let remote = MemoryRemote::new("tasks");
        let body = serde_json::to_vec(&json!({"name": "A"})).unwrap();
        remote.put("tasks/K1.json", body).await.unwrap();
        assert_eq!(remote.record("K1"), Some(json!({"name": "A"})));

        let all: serde_json::Value =
            serde_json::from_slice(&remote.get("/tasks.json").await.unwrap().body).unwrap();
        assert_eq!(all, json!({"K1": {"name": "A"}}));

        remote.delete("tasks/K1.json").await.unwrap();
        assert!(remote.is_empty());
        assert_eq!(remote.request_count(), 3);
    }

    #[tokio::test]
    async fn put_rejects_invalid_json_and_unknown_paths() {
        let remote = MemoryRemote::new("tasks");
        assert_eq!(remote.put("tasks/K.json", b"{".to_vec()).await.unwrap().status, 400);
        assert_eq!(remote.put("other/K.json", b"{}".to_vec()).await.unwrap().status, 404);
        assert_eq!(remote.delete("tasks/a/b.json").await.unwrap().status, 404);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn offline_fails_with_transport_error() {
        let remote = MemoryRemote::new("tasks");
        remote.set_offline(true);
        assert!(matches!(
            remote.get("tasks.json").await,
            Err(SyncError::Transport(_))
        ));
        assert_eq!(remote.request_count(), 1);
    }

    #[test]
    fn http_client_joins_paths() {
        let config = SyncConfig::new("https://example.invalid/");
        let client = HttpRemoteClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://example.invalid");
        assert_eq!(client.url("/tasks.json"), "https://example.invalid/tasks.json");
        assert_eq!(client.url("tasks/A.json"), "https://example.invalid/tasks/A.json");
    }
}
