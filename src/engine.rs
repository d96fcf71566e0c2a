//! Caller-facing API.
//!
//! An [`Engine`] owns the collaborators (parser, fetcher, store, renderers)
//! and exposes the three operations of a composition: building the
//! dependency graph, planning the work and rendering. Each call takes a fresh
//! content snapshot, so a resource is read at most once per call and every
//! stage of the call sees the same bytes.
//!
//! ```rust,no_run
//! use mdweave::engine::Engine;
//! use mdweave::identity::{BaseContext, identify};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = Engine::builder().build()?;
//! let root = identify("README.md", &BaseContext::current_dir()?)?;
//! let document = engine.render_document(&root, &json!({})).await?;
//! println!("{}", document.content);
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheStore, ConsistencyPolicy};
use crate::config::EngineConfig;
use crate::core::{ComposeError, DirectiveOrigin, RequiredMarker, ResourceKind};
use crate::diagnostics::Diagnostics;
use crate::graph::{BuildStats, DependencyGraph, GraphBuilder};
use crate::identity::{ContentSnapshot, DefaultFetcher, ResourceFetcher, ResourceId};
use crate::markdown::{DirectiveParser, DocumentParser};
use crate::render::{
    AiProvider, Assembler, ComposedDocument, Orchestrator, RenderProgress, RenderRun, Renderer,
    RendererRegistry,
};
use crate::store::{GraphStore, MemoryStore};
use crate::workplan::{Workplan, WorkplanGenerator};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of [`Engine::build_graph`].
#[derive(Debug)]
pub struct GraphReport {
    pub graph: DependencyGraph,
    /// Requested roots, deduplicated, in request order.
    pub roots: Vec<ResourceId>,
    /// Roots that cannot be composed, with the reason.
    pub failures: Vec<(ResourceId, ComposeError)>,
    pub stats: BuildStats,
}

impl GraphReport {
    /// Roots that built without error.
    pub fn composable_roots(&self) -> impl Iterator<Item = &ResourceId> {
        self.roots.iter().filter(|r| !self.failures.iter().any(|(f, _)| f == *r))
    }
}

/// Result of [`Engine::generate_workplan`].
#[derive(Debug)]
pub struct PlanReport {
    pub graph: GraphReport,
    /// Plan over the roots that passed graph construction.
    pub plan: Workplan,
}

/// Outcome for one requested root.
#[derive(Debug)]
pub struct RootOutcome {
    pub root: ResourceId,
    pub result: Result<ComposedDocument, ComposeError>,
}

/// Result of [`Engine::render`].
#[derive(Debug)]
pub struct RenderReport {
    /// One entry per requested root, in request order.
    pub documents: Vec<RootOutcome>,
    pub graph: Arc<DependencyGraph>,
    pub build: BuildStats,
    /// Nodes re-rendered in this call.
    pub rendered: usize,
    pub renderer_invocations: usize,
}

impl RenderReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.documents.iter().all(|d| d.result.is_ok())
    }

    /// Local files the roots depend on, for change detection.
    #[must_use]
    pub fn local_dependencies(&self) -> Vec<PathBuf> {
        let roots: Vec<ResourceId> = self.documents.iter().map(|d| d.root.clone()).collect();
        self.graph
            .reachable_from(&roots)
            .iter()
            .filter_map(|id| id.local_path().map(PathBuf::from))
            .collect()
    }
}

/// Summary of the persistent store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub resources: usize,
    pub cache_entries: usize,
    pub stale: usize,
    pub gone: usize,
}

/// The composition engine.
pub struct Engine {
    parser: Arc<dyn DocumentParser>,
    fetcher: Arc<dyn ResourceFetcher>,
    cache: Arc<CacheStore>,
    renderers: RendererRegistry,
    config: EngineConfig,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("renderers", &self.renderers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        self.cache.store()
    }

    fn snapshot(&self) -> ContentSnapshot {
        ContentSnapshot::new(self.fetcher.clone(), self.config.fetch_timeout())
    }

    /// Builds the dependency graph of `roots` and persists what was learned.
    pub async fn build_graph(&self, roots: &[ResourceId]) -> Result<GraphReport, ComposeError> {
        let snapshot = self.snapshot();
        let report = self.build_with(&dedup(roots), &snapshot).await?;
        self.cache.store().flush()?;
        Ok(report)
    }

    /// Builds the graph and plans the render of `roots` without rendering.
    pub async fn generate_workplan(
        &self,
        roots: &[ResourceId],
        initial_state: &Value,
    ) -> Result<PlanReport, ComposeError> {
        let snapshot = self.snapshot();
        let report = self.plan_with(&dedup(roots), initial_state, &snapshot).await?;
        self.cache.store().flush()?;
        Ok(report)
    }

    /// Renders `roots` and assembles one document per root.
    ///
    /// Failures of individual roots are reported in their [`RootOutcome`];
    /// only store failures fail the whole call.
    pub async fn render(
        &self,
        roots: &[ResourceId],
        initial_state: &Value,
    ) -> Result<RenderReport, ComposeError> {
        self.render_with_progress(roots, initial_state, None).await
    }

    /// [`Engine::render`] reporting node completion to `progress`.
    pub async fn render_with_progress(
        &self,
        roots: &[ResourceId],
        initial_state: &Value,
        progress: Option<Arc<dyn RenderProgress>>,
    ) -> Result<RenderReport, ComposeError> {
        let started_at = Utc::now();
        let snapshot = Arc::new(self.snapshot());
        let roots = dedup(roots);
        let PlanReport {
            graph: report,
            plan,
        } = self.plan_with(&roots, initial_state, &snapshot).await?;

        let graph = Arc::new(report.graph);
        let plan = Arc::new(plan);
        debug!("{plan}");

        let run = Orchestrator::new(
            self.cache.clone(),
            self.renderers.clone(),
            snapshot,
            self.config.worker_count(),
            self.config.render_timeout(),
            started_at,
        )
        .with_progress(progress)
        .run(graph.clone(), plan.clone())
        .await;

        let documents = roots
            .iter()
            .map(|root| RootOutcome {
                root: root.clone(),
                result: outcome_for(root, &report.failures, &graph, &plan, &run),
            })
            .collect();
        self.cache.store().flush()?;

        info!(
            "rendered {} of {} nodes ({} renderer calls)",
            run.rendered.len(),
            plan.order().len(),
            run.renderer_invocations
        );
        Ok(RenderReport {
            documents,
            graph,
            build: report.stats,
            rendered: run.rendered.len(),
            renderer_invocations: run.renderer_invocations,
        })
    }

    /// Renders a single root.
    pub async fn render_document(
        &self,
        root: &ResourceId,
        initial_state: &Value,
    ) -> Result<ComposedDocument, ComposeError> {
        let report = self.render(std::slice::from_ref(root), initial_state).await?;
        match report.documents.into_iter().next() {
            Some(outcome) => outcome.result,
            None => Err(ComposeError::Cancelled { id: root.clone() }),
        }
    }

    /// Removes stored resources that are not reachable from `roots`.
    /// Returns how many were removed.
    pub async fn prune(&self, roots: &[ResourceId]) -> Result<usize, ComposeError> {
        let report = self.build_graph(roots).await?;
        let keep: HashSet<ResourceId> =
            report.graph.reachable_from(&report.roots).into_iter().collect();
        let store = self.cache.store();
        let mut removed = 0;
        for id in store.resource_ids()? {
            if !keep.contains(&id) {
                debug!(target: "store", "pruning {id}");
                store.remove(&id)?;
                removed += 1;
            }
        }
        store.flush()?;
        info!("pruned {removed} unreachable resources");
        Ok(removed)
    }

    /// Removes everything from the store.
    pub fn clear(&self) -> Result<usize, ComposeError> {
        let store = self.cache.store();
        let ids = store.resource_ids()?;
        for id in &ids {
            store.remove(id)?;
        }
        store.flush()?;
        Ok(ids.len())
    }

    pub fn summary(&self) -> Result<StoreSummary, ComposeError> {
        let store = self.cache.store();
        let mut summary = StoreSummary::default();
        for id in store.resource_ids()? {
            summary.resources += 1;
            if let Some(entry) = store.get_cache_entry(&id)? {
                summary.cache_entries += 1;
                summary.stale += usize::from(entry.stale);
                summary.gone += usize::from(entry.gone);
            }
        }
        Ok(summary)
    }

    async fn build_with(
        &self,
        roots: &[ResourceId],
        snapshot: &ContentSnapshot,
    ) -> Result<GraphReport, ComposeError> {
        let outcome = GraphBuilder::new(self.parser.as_ref(), &self.cache, snapshot)
            .build(roots)
            .await?;
        let mut failures = outcome.failures;
        for root in &outcome.roots {
            if let Some(err) = invalid_required_reference(&outcome.graph, root) {
                failures.push((root.clone(), err));
            }
        }
        Ok(GraphReport {
            graph: outcome.graph,
            roots: roots.to_vec(),
            failures,
            stats: outcome.stats,
        })
    }

    async fn plan_with(
        &self,
        roots: &[ResourceId],
        initial_state: &Value,
        snapshot: &ContentSnapshot,
    ) -> Result<PlanReport, ComposeError> {
        let graph = self.build_with(roots, snapshot).await?;
        let composable: Vec<ResourceId> = graph.composable_roots().cloned().collect();
        let plan = WorkplanGenerator::new(&self.cache, snapshot, self.config.worker_count())
            .generate(&graph.graph, &composable, initial_state)
            .await?;
        Ok(PlanReport {
            graph,
            plan,
        })
    }
}

fn dedup(roots: &[ResourceId]) -> Vec<ResourceId> {
    let mut seen = HashSet::new();
    roots.iter().filter(|r| seen.insert((*r).clone())).cloned().collect()
}

/// A `!` directive whose target is not a valid reference fails every root
/// that reaches the document containing it.
fn invalid_required_reference(graph: &DependencyGraph, root: &ResourceId) -> Option<ComposeError> {
    graph.reachable_from(std::slice::from_ref(root)).into_iter().find_map(|id| {
        let node = graph.node(&id)?;
        let invalid =
            node.invalid_references.iter().find(|r| r.marker == RequiredMarker::Required)?;
        Some(ComposeError::RequiredResourceFailed {
            id: id.clone(),
            root: root.clone(),
            origin: Some(DirectiveOrigin {
                document: id.clone(),
                position: invalid.position,
            }),
            reason: format!("invalid reference '{}': {}", invalid.reference, invalid.reason),
        })
    })
}

fn outcome_for(
    root: &ResourceId,
    build_failures: &[(ResourceId, ComposeError)],
    graph: &DependencyGraph,
    plan: &Workplan,
    run: &RenderRun,
) -> Result<ComposedDocument, ComposeError> {
    if let Some((_, err)) = build_failures.iter().find(|(r, _)| r == root) {
        return Err(err.clone());
    }
    let index = plan.roots.iter().position(|r| r == root);
    if let Some(err) = index.and_then(|i| run.root_failures.get(i).cloned().flatten()) {
        return Err(err);
    }

    let (content, items) = Assembler::new(graph, run).compose(root);
    let mut diagnostics = Diagnostics {
        items,
        ..Diagnostics::default()
    };
    for id in graph.reachable_from(std::slice::from_ref(root)) {
        let kind = graph.node(&id).map_or(ResourceKind::Document, |n| n.kind);
        if run.rendered.contains(&id) {
            diagnostics.stats.record_recomputed(kind);
        } else if run.failures.contains_key(&id) {
            diagnostics.stats.record_failed(kind);
        } else {
            diagnostics.stats.record_cached(kind);
        }
    }
    Ok(ComposedDocument {
        root: root.clone(),
        content,
        diagnostics,
    })
}

/// Configures an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    parser: Option<Arc<dyn DocumentParser>>,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    store: Option<Arc<dyn GraphStore>>,
    ai: Option<Arc<dyn AiProvider>>,
    renderers: Vec<(ResourceKind, Arc<dyn Renderer>)>,
}

impl EngineBuilder {
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Store for graph and cache state. Defaults to an in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_ai_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.ai = Some(provider);
        self
    }

    /// Replaces the built-in renderer for `kind`.
    #[must_use]
    pub fn with_renderer(mut self, kind: ResourceKind, renderer: Arc<dyn Renderer>) -> Self {
        self.renderers.push((kind, renderer));
        self
    }

    pub fn build(self) -> Result<Engine, ComposeError> {
        self.config.validate().map_err(|e| ComposeError::Config {
            message: format!("{e:#}"),
        })?;

        let parser: Arc<dyn DocumentParser> = match self.parser {
            Some(parser) => parser,
            None => Arc::new(DirectiveParser),
        };
        let fetcher: Arc<dyn ResourceFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(DefaultFetcher::new(
                self.config.fetch_timeout(),
                &self.config.user_agent,
            )?),
        };
        let store: Arc<dyn GraphStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let cache = Arc::new(CacheStore::new(
            store,
            ConsistencyPolicy::new(self.config.remote_ttl()),
            self.config.pending_timeout(),
        ));

        let mut renderers = RendererRegistry::with_defaults(parser.clone(), self.ai);
        for (kind, renderer) in self.renderers {
            renderers.register(kind, renderer);
        }

        Ok(Engine {
            parser,
            fetcher,
            cache,
            renderers,
            config: self.config,
        })
    }
}
