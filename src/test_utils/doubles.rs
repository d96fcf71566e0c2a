//! Test doubles for the fetcher, renderer and AI seams.

use crate::core::{RemoteFailure, UnavailableKind};
use crate::identity::{FetchError, ResourceFetcher, ResourceId};
use crate::render::{AiProvider, AiRequest, RenderOutput, RenderRequest, Renderer};
use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Fetcher serving scripted responses.
///
/// Unknown identifiers fail like a missing local file. Every fetch is
/// counted per identifier.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: DashMap<ResourceId, Result<Vec<u8>, UnavailableKind>>,
    calls: DashMap<ResourceId, usize>,
    delay_ms: AtomicU64,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `content` for `id`, replacing any previous response.
    pub fn insert(&self, id: &ResourceId, content: &str) {
        self.responses.insert(id.clone(), Ok(content.as_bytes().to_vec()));
    }

    /// Makes fetches of `id` fail with `kind`.
    pub fn fail(&self, id: &ResourceId, kind: UnavailableKind) {
        self.responses.insert(id.clone(), Err(kind));
    }

    /// Shorthand for a remote failure.
    pub fn fail_remote(&self, id: &ResourceId, failure: RemoteFailure) {
        self.fail(id, UnavailableKind::remote(failure));
    }

    pub fn remove(&self, id: &ResourceId) {
        self.responses.remove(id);
    }

    /// Delays every fetch, to widen race windows.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn calls(&self, id: &ResourceId) -> usize {
        self.calls.get(id).map_or(0, |c| *c)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_calls(&self) {
        self.calls.clear();
    }
}

#[async_trait]
impl ResourceFetcher for ScriptedFetcher {
    async fn fetch(&self, id: &ResourceId) -> Result<Vec<u8>, FetchError> {
        *self.calls.entry(id.clone()).or_insert(0) += 1;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let response = self.responses.get(id).map(|r| r.value().clone());
        match response {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(kind)) => Err(FetchError {
                id: id.clone(),
                kind,
            }),
            None => Err(FetchError::local(id, "not found")),
        }
    }
}

/// Wraps a renderer and counts its invocations per resource.
pub struct CountingRenderer {
    inner: Arc<dyn Renderer>,
    calls: DashMap<ResourceId, usize>,
    failing: DashMap<ResourceId, String>,
    delay_ms: AtomicU64,
}

impl CountingRenderer {
    pub fn new(inner: Arc<dyn Renderer>) -> Self {
        Self {
            inner,
            calls: DashMap::new(),
            failing: DashMap::new(),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Makes renders of `id` fail with `message`.
    pub fn fail_on(&self, id: &ResourceId, message: &str) {
        self.failing.insert(id.clone(), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    pub fn calls(&self, id: &ResourceId) -> usize {
        self.calls.get(id).map_or(0, |c| *c)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn render(&self, request: &RenderRequest) -> anyhow::Result<RenderOutput> {
        *self.calls.entry(request.id.clone()).or_insert(0) += 1;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let failure = self.failing.get(&request.id).map(|m| m.value().clone());
        if let Some(message) = failure {
            bail!(message);
        }
        self.inner.render(request).await
    }
}

/// AI provider that echoes its task and inputs.
#[derive(Default)]
pub struct EchoAiProvider {
    calls: AtomicUsize,
}

impl EchoAiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for EchoAiProvider {
    async fn generate(&self, request: &AiRequest) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inputs: Vec<&str> = request.inputs.iter().map(|i| i.content.trim()).collect();
        Ok(format!("[{}] {}", request.task, inputs.join(" | ")))
    }
}
