//! Common fixtures for the mdweave integration tests
//!
//! [`Harness`] wires an [`Engine`] to a temporary project: local files are
//! read from disk, remote URLs are served by a [`ScriptedFetcher`], and the
//! document, image and HTML renderers are wrapped in [`CountingRenderer`]s so
//! tests can assert exactly what was re-rendered.

// Not every test file uses every helper
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use mdweave::config::EngineConfig;
use mdweave::core::ResourceKind;
use mdweave::engine::{Engine, RenderReport};
use mdweave::identity::{DefaultFetcher, FetchError, ResourceFetcher, ResourceId};
use mdweave::markdown::DirectiveParser;
use mdweave::render::{ComposedDocument, DocumentRenderer, HtmlRenderer, ImageRenderer};
use mdweave::store::{FileStore, GraphStore, MemoryStore};
use mdweave::test_utils::{CountingRenderer, EchoAiProvider, ScriptedFetcher, TestProject};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Reads local files from disk and serves remote URLs from a script.
pub struct MixedFetcher {
    local: DefaultFetcher,
    remote: Arc<ScriptedFetcher>,
}

impl MixedFetcher {
    pub fn new(remote: Arc<ScriptedFetcher>) -> Result<Self> {
        Ok(Self {
            local: DefaultFetcher::new(Duration::from_secs(5), "mdweave-tests")?,
            remote,
        })
    }
}

#[async_trait]
impl ResourceFetcher for MixedFetcher {
    async fn fetch(&self, id: &ResourceId) -> Result<Vec<u8>, FetchError> {
        if id.is_remote() {
            self.remote.fetch(id).await
        } else {
            self.local.fetch(id).await
        }
    }
}

/// An engine over a temporary project with instrumented collaborators.
pub struct Harness {
    pub project: TestProject,
    pub remote: Arc<ScriptedFetcher>,
    pub documents: Arc<CountingRenderer>,
    pub images: Arc<CountingRenderer>,
    pub pages: Arc<CountingRenderer>,
    pub ai: Arc<EchoAiProvider>,
    pub store: Arc<dyn GraphStore>,
    pub engine: Engine,
}

impl Harness {
    /// Harness with an in-memory store and default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let project = TestProject::new()?;
        let store: Arc<dyn GraphStore> = Arc::new(MemoryStore::new());
        Self::assemble(project, store, config)
    }

    /// Harness persisting to the project's store file.
    pub fn persistent(project: TestProject) -> Result<Self> {
        let store: Arc<dyn GraphStore> = Arc::new(FileStore::open(&project.store_path)?);
        Self::assemble(project, store, EngineConfig::default())
    }

    fn assemble(
        project: TestProject,
        store: Arc<dyn GraphStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let remote = Arc::new(ScriptedFetcher::new());
        let documents = Arc::new(CountingRenderer::new(Arc::new(DocumentRenderer::new(Arc::new(
            DirectiveParser::new(),
        )))));
        let images = Arc::new(CountingRenderer::new(Arc::new(ImageRenderer)));
        let pages = Arc::new(CountingRenderer::new(Arc::new(HtmlRenderer)));
        let ai = Arc::new(EchoAiProvider::new());

        let engine = Engine::builder()
            .with_config(config)
            .with_fetcher(Arc::new(MixedFetcher::new(remote.clone())?))
            .with_store(store.clone())
            .with_ai_provider(ai.clone())
            .with_renderer(ResourceKind::Document, documents.clone())
            .with_renderer(ResourceKind::Image, images.clone())
            .with_renderer(ResourceKind::Html, pages.clone())
            .build()?;

        Ok(Self {
            project,
            remote,
            documents,
            images,
            pages,
            ai,
            store,
            engine,
        })
    }

    /// Releases the engine and returns the project, so a second harness can
    /// reopen the same store.
    pub fn into_project(self) -> TestProject {
        self.project
    }

    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        self.project.write(relative, content)?;
        Ok(())
    }

    pub fn id(&self, relative: &str) -> ResourceId {
        self.project.id(relative)
    }

    pub async fn render(&self, roots: &[&str]) -> Result<RenderReport> {
        self.render_with_state(roots, &json!({})).await
    }

    pub async fn render_with_state(&self, roots: &[&str], state: &Value) -> Result<RenderReport> {
        let roots: Vec<ResourceId> = roots.iter().map(|r| self.id(r)).collect();
        Ok(self.engine.render(&roots, state).await?)
    }

    /// Renders a single root and expects it to succeed.
    pub async fn compose(&self, root: &str) -> Result<ComposedDocument> {
        Ok(self.engine.render_document(&self.id(root), &json!({})).await?)
    }
}

/// Remote identifier for `path` on the test host.
pub fn remote(path: &str) -> ResourceId {
    ResourceId::Remote(format!("https://example.com/{path}"))
}

/// Moves the last check of a cached remote resource `age` into the past.
pub fn age_entry(
    store: &Arc<dyn GraphStore>,
    id: &ResourceId,
    age: chrono::Duration,
) -> Result<()> {
    let mut entry = store
        .get_cache_entry(id)?
        .ok_or_else(|| anyhow::anyhow!("no cache entry for {id}"))?;
    entry.checked_at -= age;
    store.put_cache_entry(entry)?;
    Ok(())
}
