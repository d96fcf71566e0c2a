//! Fetching raw resource content.
//!
//! [`ResourceFetcher`] is the seam between the engine and the outside world:
//! [`DefaultFetcher`] reads local files with `tokio::fs` and remote URLs with
//! `reqwest`, tests substitute a scripted implementation.
//!
//! [`ContentSnapshot`] wraps a fetcher for the lifetime of one engine
//! invocation. Each resource is fetched at most once per snapshot, so graph
//! construction, freshness checks and rendering all observe the same bytes.

use super::{ContentHash, ResourceId};
use crate::core::{ComposeError, RemoteFailure, UnavailableKind};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::debug;

/// A failed fetch, classified for the consistency policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot fetch '{id}': {kind}")]
pub struct FetchError {
    pub id: ResourceId,
    pub kind: UnavailableKind,
}

impl FetchError {
    pub fn local(id: &ResourceId, reason: impl Into<String>) -> Self {
        Self {
            id: id.clone(),
            kind: UnavailableKind::local(reason),
        }
    }

    #[must_use]
    pub fn remote(id: &ResourceId, failure: RemoteFailure) -> Self {
        Self {
            id: id.clone(),
            kind: UnavailableKind::remote(failure),
        }
    }
}

impl From<FetchError> for ComposeError {
    fn from(err: FetchError) -> Self {
        Self::ResourceUnavailable {
            id: err.id,
            kind: err.kind,
        }
    }
}

/// Fetched bytes and their hash.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content: Arc<[u8]>,
    pub hash: ContentHash,
}

impl Fetched {
    #[must_use]
    pub fn new(content: Vec<u8>) -> Self {
        let hash = ContentHash::of(&content);
        Self {
            content: content.into(),
            hash,
        }
    }

    /// Content decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Source of raw resource bytes.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Reads the content of a local or remote resource.
    ///
    /// Derived resources have no raw content and must not be passed here.
    async fn fetch(&self, id: &ResourceId) -> Result<Vec<u8>, FetchError>;
}

/// Fetcher backed by the filesystem and HTTP.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    /// Creates a fetcher whose HTTP requests time out after `timeout`.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ComposeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ComposeError::Config {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn fetch_remote(&self, id: &ResourceId, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| classify(id, &e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::remote(id, RemoteFailure::NotFound));
        }
        if !status.is_success() {
            return Err(FetchError::remote(
                id,
                RemoteFailure::Status {
                    code: status.as_u16(),
                },
            ));
        }

        let bytes = response.bytes().await.map_err(|e| classify(id, &e))?;
        Ok(bytes.to_vec())
    }
}

fn classify(id: &ResourceId, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::remote(id, RemoteFailure::Timeout)
    } else {
        FetchError::remote(
            id,
            RemoteFailure::Connection {
                message: err.to_string(),
            },
        )
    }
}

#[async_trait]
impl ResourceFetcher for DefaultFetcher {
    async fn fetch(&self, id: &ResourceId) -> Result<Vec<u8>, FetchError> {
        match id {
            ResourceId::Local(path) => {
                tokio::fs::read(path).await.map_err(|e| FetchError::local(id, e.to_string()))
            }
            ResourceId::Remote(url) => self.fetch_remote(id, url).await,
            ResourceId::Derived { .. } => {
                Err(FetchError::local(id, "derived resources have no raw content"))
            }
        }
    }
}

/// Per-invocation view of resource content.
///
/// Concurrent requests for the same resource share one fetch; the outcome,
/// success or failure, is kept for the rest of the invocation.
pub struct ContentSnapshot {
    fetcher: Arc<dyn ResourceFetcher>,
    timeout: Duration,
    entries: DashMap<ResourceId, Arc<OnceCell<Result<Fetched, FetchError>>>>,
}

impl ContentSnapshot {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, timeout: Duration) -> Self {
        Self {
            fetcher,
            timeout,
            entries: DashMap::new(),
        }
    }

    /// Returns the content of `id`, fetching it on first use.
    pub async fn get(&self, id: &ResourceId) -> Result<Fetched, FetchError> {
        let cell = self.entries.entry(id.clone()).or_default().clone();
        cell.get_or_init(|| async {
            debug!(target: "fetch", "fetching {id}");
            match tokio::time::timeout(self.timeout, self.fetcher.fetch(id)).await {
                Ok(Ok(bytes)) => Ok(Fetched::new(bytes)),
                Ok(Err(err)) => {
                    debug!(target: "fetch", "fetch of {id} failed: {}", err.kind);
                    Err(err)
                }
                Err(_) if id.is_remote() => Err(FetchError::remote(id, RemoteFailure::Timeout)),
                Err(_) => Err(FetchError::local(
                    id,
                    format!("read timed out after {}ms", self.timeout.as_millis()),
                )),
            }
        })
        .await
        .clone()
    }

    /// Whether `id` has already been fetched in this snapshot.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.entries.get(id).is_some_and(|cell| cell.initialized())
    }
}
