//! Workplan execution.
//!
//! Layers run strictly in order. Within a layer every node is a spawned task
//! and at most `workers` of them run at once; the next layer starts when all
//! nodes of the current one are terminal.
//!
//! A node's renderer runs under the render timeout and inside a cancellation
//! scope: once every root a node serves has failed, pending nodes are skipped
//! and in-flight renders are dropped.

use super::assemble::{ArtifactSource, Assembler};
use super::{ComposedInput, Fragment, RenderRequest, RendererRegistry};
use crate::cache::{
    CacheEntry, CacheStore, Claim, ConsistencyPolicy, FailureDisposition, Freshness,
};
use crate::core::{
    ComposeError, ConsistencyClass, DirectiveOrigin, RemoteFailure, ResourceKind, UnavailableKind,
};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::graph::DependencyGraph;
use crate::identity::{ContentHash, ContentSnapshot, FetchError, ResourceId};
use crate::workplan::{PlannedNode, Workplan};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Lifecycle of a node within one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Rendering,
    Rendered,
    Failed,
}

/// Everything a render produced, ready for assembly.
#[derive(Debug, Default)]
pub struct RenderRun {
    pub artifacts: HashMap<ResourceId, Fragment>,
    pub states: HashMap<ResourceId, NodeState>,
    pub failures: HashMap<ResourceId, ComposeError>,
    pub notes: HashMap<ResourceId, Vec<Diagnostic>>,
    /// Fatal error per root, indexed like [`Workplan::roots`].
    pub root_failures: Vec<Option<ComposeError>>,
    /// Nodes whose renderer ran and succeeded in this render.
    pub rendered: HashSet<ResourceId>,
    pub renderer_invocations: usize,
}

impl ArtifactSource for RenderRun {
    fn artifact(&self, id: &ResourceId) -> Option<Fragment> {
        self.artifacts.get(id).cloned()
    }

    fn failure(&self, id: &ResourceId) -> Option<ComposeError> {
        self.failures.get(id).cloned()
    }

    fn notes(&self, id: &ResourceId) -> Vec<Diagnostic> {
        self.notes.get(id).cloned().unwrap_or_default()
    }
}

/// Observer of render progress. All methods default to doing nothing.
pub trait RenderProgress: Send + Sync {
    /// Called once with the number of nodes that will be rendered.
    fn planned(&self, _to_render: usize) {}

    /// Called when a node reaches a terminal state.
    fn finished(&self, _id: &ResourceId, _state: NodeState) {}
}

/// Runs workplans.
pub struct Orchestrator {
    cache: Arc<CacheStore>,
    renderers: RendererRegistry,
    snapshot: Arc<ContentSnapshot>,
    workers: usize,
    render_timeout: Duration,
    started_at: DateTime<Utc>,
    progress: Option<Arc<dyn RenderProgress>>,
}

impl Orchestrator {
    /// `started_at` is when the invocation began; entries recorded after it
    /// by concurrent invocations are reused instead of rendering again.
    pub fn new(
        cache: Arc<CacheStore>,
        renderers: RendererRegistry,
        snapshot: Arc<ContentSnapshot>,
        workers: usize,
        render_timeout: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cache,
            renderers,
            snapshot,
            workers: workers.max(1),
            render_timeout,
            started_at,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<Arc<dyn RenderProgress>>) -> Self {
        self.progress = progress;
        self
    }

    /// Executes `plan` over `graph`.
    pub async fn run(&self, graph: Arc<DependencyGraph>, plan: Arc<Workplan>) -> RenderRun {
        let ctx = Arc::new(RunContext {
            cache: self.cache.clone(),
            renderers: self.renderers.clone(),
            snapshot: self.snapshot.clone(),
            render_timeout: self.render_timeout,
            started_at: self.started_at,
            root_cancelled: plan.roots.iter().map(|_| AtomicBool::new(false)).collect(),
            root_failures: Mutex::new(vec![None; plan.roots.len()]),
            cancel: Notify::new(),
            artifacts: DashMap::new(),
            states: DashMap::new(),
            failures: DashMap::new(),
            notes: DashMap::new(),
            rendered: DashMap::new(),
            invocations: AtomicUsize::new(0),
            progress: self.progress.clone(),
            graph,
            plan,
        });
        ctx.seed();
        if let Some(progress) = &self.progress {
            progress.planned(ctx.plan.dirty_count());
        }

        for layer in &ctx.plan.layers {
            debug!(target: "render", "layer {}: {} nodes", layer.index, layer.nodes.len());
            let results: Vec<(ResourceId, Result<(), tokio::task::JoinError>)> =
                stream::iter(layer.nodes.iter().cloned())
                    .map(|id| {
                        let ctx = ctx.clone();
                        let task_id = id.clone();
                        let handle = tokio::spawn(async move { ctx.render_node(&task_id).await });
                        async move { (id, handle.await) }
                    })
                    .buffer_unordered(self.workers)
                    .collect()
                    .await;

            for (id, result) in results {
                if let Err(e) = result {
                    error!(target: "render", "render task for {id} aborted: {e}");
                    let kind = ctx.kind_of(&id);
                    ctx.fail(
                        &id,
                        ComposeError::RendererError {
                            id: id.clone(),
                            kind,
                            message: format!("render task aborted: {e}"),
                        },
                    );
                    ctx.report(&id);
                }
            }
        }

        ctx.finish()
    }
}

struct RunContext {
    cache: Arc<CacheStore>,
    renderers: RendererRegistry,
    snapshot: Arc<ContentSnapshot>,
    graph: Arc<DependencyGraph>,
    plan: Arc<Workplan>,
    render_timeout: Duration,
    started_at: DateTime<Utc>,
    root_cancelled: Vec<AtomicBool>,
    root_failures: Mutex<Vec<Option<ComposeError>>>,
    cancel: Notify,
    artifacts: DashMap<ResourceId, Fragment>,
    states: DashMap<ResourceId, NodeState>,
    failures: DashMap<ResourceId, ComposeError>,
    notes: DashMap<ResourceId, Vec<Diagnostic>>,
    rendered: DashMap<ResourceId, ()>,
    invocations: AtomicUsize,
    progress: Option<Arc<dyn RenderProgress>>,
}

/// How a dirty node ended up with an artifact.
enum Produced {
    Rendered { fragment: Fragment, notes: Vec<Diagnostic> },
    /// Another invocation rendered it while we waited.
    Reused(Fragment),
    /// A fallback artifact was served with a diagnostic.
    Fallback { fragment: Fragment, note: Diagnostic },
}

impl ArtifactSource for RunContext {
    fn artifact(&self, id: &ResourceId) -> Option<Fragment> {
        self.artifacts.get(id).map(|r| r.value().clone())
    }

    fn failure(&self, id: &ResourceId) -> Option<ComposeError> {
        self.failures.get(id).map(|r| r.value().clone())
    }

    fn notes(&self, _id: &ResourceId) -> Vec<Diagnostic> {
        Vec::new()
    }
}

impl RunContext {
    /// Serves cached artifacts for every clean node.
    fn seed(&self) {
        for id in self.plan.order() {
            let Some(node) = self.plan.node(id) else {
                continue;
            };
            match &node.freshness {
                Freshness::Dirty(_) => {
                    self.states.insert(id.clone(), NodeState::Pending);
                }
                Freshness::Fresh(entry) => self.serve(id, entry, None),
                Freshness::Stale { entry, failure } => self.serve(
                    id,
                    entry,
                    Some(
                        Diagnostic::warning(
                            DiagnosticCode::StaleContent,
                            format!("could not re-check '{id}' ({failure}); using cached copy"),
                        )
                        .with_resource(id),
                    ),
                ),
                Freshness::Missing(entry) => self.serve(
                    id,
                    entry,
                    Some(
                        Diagnostic::warning(
                            DiagnosticCode::RemoteNotFound,
                            format!("'{id}' no longer exists; rendered empty"),
                        )
                        .with_resource(id),
                    ),
                ),
            }
        }
    }

    fn serve(&self, id: &ResourceId, entry: &CacheEntry, note: Option<Diagnostic>) {
        self.artifacts.insert(id.clone(), entry.artifact.clone());
        self.states.insert(id.clone(), NodeState::Rendered);
        if let Some(note) = note {
            self.notes.insert(id.clone(), vec![note]);
        }
    }

    fn kind_of(&self, id: &ResourceId) -> ResourceKind {
        self.plan.node(id).map_or(ResourceKind::Document, |n| n.kind)
    }

    fn all_roots_cancelled(&self, id: &ResourceId) -> bool {
        let roots = self.plan.roots_of(id);
        !roots.is_empty()
            && roots
                .iter()
                .all(|&r| self.root_cancelled.get(r).is_some_and(|c| c.load(Ordering::SeqCst)))
    }

    /// Resolves once every root served by `id` has failed.
    async fn cancelled(&self, id: &ResourceId) {
        loop {
            let notified = self.cancel.notified();
            if self.all_roots_cancelled(id) {
                return;
            }
            notified.await;
        }
    }

    fn report(&self, id: &ResourceId) {
        if let Some(progress) = &self.progress {
            let state = self.states.get(id).map_or(NodeState::Failed, |s| *s.value());
            progress.finished(id, state);
        }
    }

    async fn render_node(&self, id: &ResourceId) {
        self.render_node_inner(id).await;
        self.report(id);
    }

    async fn render_node_inner(&self, id: &ResourceId) {
        let Some(node) = self.plan.node(id) else {
            return;
        };
        if self.all_roots_cancelled(id) {
            debug!(target: "render", "skipping {id}: all of its roots failed");
            self.fail(id, ComposeError::Cancelled { id: id.clone() });
            return;
        }
        if let Some(err) = self.failed_source(id) {
            self.fail(id, err);
            return;
        }

        self.states.insert(id.clone(), NodeState::Rendering);
        let outcome = tokio::select! {
            outcome = self.produce(id, node) => outcome,
            () = self.cancelled(id) => Err(ComposeError::Cancelled { id: id.clone() }),
        };

        match outcome {
            Ok(Produced::Rendered { fragment, notes }) => {
                self.artifacts.insert(id.clone(), fragment);
                if !notes.is_empty() {
                    self.notes.insert(id.clone(), notes);
                }
                self.rendered.insert(id.clone(), ());
                self.states.insert(id.clone(), NodeState::Rendered);
            }
            Ok(Produced::Reused(fragment)) => {
                debug!(target: "render", "{id} was rendered by a concurrent request");
                self.artifacts.insert(id.clone(), fragment);
                self.states.insert(id.clone(), NodeState::Rendered);
            }
            Ok(Produced::Fallback { fragment, note }) => {
                self.artifacts.insert(id.clone(), fragment);
                self.notes.insert(id.clone(), vec![note]);
                self.states.insert(id.clone(), NodeState::Rendered);
            }
            Err(err) => self.fail(id, err),
        }
    }

    /// A derived node cannot render when one of its sources failed.
    fn failed_source(&self, id: &ResourceId) -> Option<ComposeError> {
        let ResourceId::Derived { sources, .. } = id else {
            return None;
        };
        sources.iter().find_map(|source| {
            self.failure(source).map(|err| ComposeError::RendererError {
                id: id.clone(),
                kind: self.kind_of(id),
                message: format!("source '{source}' failed: {err}"),
            })
        })
    }

    async fn produce(&self, id: &ResourceId, node: &PlannedNode) -> Result<Produced, ComposeError> {
        let render_key = node.inputs.render_key;
        let _guard = match self.cache.claim(id, render_key, self.started_at).await? {
            Claim::Completed(entry) => return Ok(Produced::Reused(entry.artifact)),
            Claim::Leader(guard) => guard,
        };

        let (content, content_hash, inputs) = if let ResourceId::Derived { sources, .. } = id {
            let assembler = Assembler::new(&self.graph, self);
            let inputs = sources
                .iter()
                .map(|source| ComposedInput {
                    id: source.clone(),
                    content: assembler.compose(source).0,
                })
                .collect();
            let hash = node.content_hash.unwrap_or_else(ContentHash::empty);
            (Arc::<[u8]>::from(Vec::new()), hash, inputs)
        } else {
            match self.snapshot.get(id).await {
                Ok(fetched) => (fetched.content, fetched.hash, Vec::new()),
                Err(err) => return self.fetch_fallback(id, err),
            }
        };

        let kind = node.kind;
        let renderer = self.renderers.get(kind).ok_or_else(|| ComposeError::RendererError {
            id: id.clone(),
            kind,
            message: "no renderer registered".to_string(),
        })?;
        let request = RenderRequest {
            id: id.clone(),
            kind,
            content: content.clone(),
            state: node.inputs.state.clone(),
            options: node.inputs.options.clone(),
            directive_kind: node.inputs.directive_kind,
            inputs,
        };

        let policy = self.cache.policy();
        let class = if id.is_derived() {
            ConsistencyClass::LocalSync
        } else {
            policy.classify(id, kind, Some(&content[..]))
        };

        self.invocations.fetch_add(1, Ordering::SeqCst);
        debug!(target: "render", "rendering {id} as {kind}");
        let rendered = tokio::time::timeout(self.render_timeout, renderer.render(&request)).await;
        let result = match rendered {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ComposeError::RendererError {
                id: id.clone(),
                kind,
                message: format!("{e:#}"),
            }),
            Err(_) => Err(ComposeError::RenderTimeout {
                id: id.clone(),
                timeout_ms: u64::try_from(self.render_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let output = match result {
            Ok(output) => output,
            Err(err) => return self.render_fallback(id, class, err),
        };

        self.cache.record(CacheEntry {
            id: id.clone(),
            kind,
            content_hash,
            render_key,
            artifact: output.fragment.clone(),
            class,
            checked_at: Utc::now(),
            ttl_secs: policy.ttl_secs(class, &node.inputs.options),
            stale: false,
            gone: false,
        })?;
        Ok(Produced::Rendered {
            fragment: output.fragment,
            notes: output.notes,
        })
    }

    /// A remote resource with a cached render survives a failed fetch.
    fn fetch_fallback(&self, id: &ResourceId, err: FetchError) -> Result<Produced, ComposeError> {
        let unavailable = || ComposeError::ResourceUnavailable {
            id: id.clone(),
            kind: err.kind.clone(),
        };
        let UnavailableKind::Remote { failure } = &err.kind else {
            return Err(unavailable());
        };
        let Some(entry) = self.cache.lookup(id)? else {
            return Err(unavailable());
        };
        Ok(self.remote_fallback(id, entry, failure))
    }

    fn remote_fallback(
        &self,
        id: &ResourceId,
        entry: CacheEntry,
        failure: &RemoteFailure,
    ) -> Produced {
        if failure.is_not_found() {
            warn!(target: "render", "{id} is gone (404), rendering empty");
            return Produced::Fallback {
                fragment: Fragment::empty(),
                note: Diagnostic::warning(
                    DiagnosticCode::RemoteNotFound,
                    format!("'{id}' no longer exists; rendered empty"),
                )
                .with_resource(id),
            };
        }
        warn!(target: "render", "cannot fetch {id} ({failure}), serving cached copy");
        if let Err(e) = self.cache.mark_stale(id) {
            warn!(target: "render", "failed to mark {id} stale: {e}");
        }
        Produced::Fallback {
            fragment: entry.artifact,
            note: Diagnostic::warning(
                DiagnosticCode::StaleContent,
                format!("could not fetch '{id}' ({failure}); using cached copy"),
            )
            .with_resource(id),
        }
    }

    /// Renderer failures that do not fail the node: local-async resources
    /// keep their previous output, and a remote render that timed out is
    /// treated like a connection failure.
    fn render_fallback(
        &self,
        id: &ResourceId,
        class: ConsistencyClass,
        err: ComposeError,
    ) -> Result<Produced, ComposeError> {
        match class {
            ConsistencyClass::LocalAsync => {
                warn!(target: "render", "{err}; keeping previous output");
                let fragment = self.cache.lookup(id)?.map(|e| e.artifact).unwrap_or_default();
                Ok(Produced::Fallback {
                    fragment,
                    note: Diagnostic::error(DiagnosticCode::AsyncRenderFailed, err.to_string())
                        .with_resource(id),
                })
            }
            ConsistencyClass::Remote if matches!(err, ComposeError::RenderTimeout { .. }) => {
                match self.cache.lookup(id)? {
                    Some(entry) => Ok(self.remote_fallback(id, entry, &RemoteFailure::Timeout)),
                    None => Err(err),
                }
            }
            _ => Err(err),
        }
    }

    /// Records a node failure and fails the roots it is fatal for.
    fn fail(&self, id: &ResourceId, err: ComposeError) {
        self.states.insert(id.clone(), NodeState::Failed);
        self.failures.insert(id.clone(), err.clone());
        if matches!(err, ComposeError::Cancelled { .. }) {
            return;
        }
        debug!(target: "render", "{id} failed: {err}");

        for (index, root) in self.plan.roots.iter().enumerate() {
            if root == id {
                self.fail_root(index, err.clone());
            }
        }
        for (parent, edge) in self.graph.dependents(id) {
            if ConsistencyPolicy::failure_disposition(edge.marker) != FailureDisposition::Fatal {
                continue;
            }
            for &index in self.plan.roots_of(parent) {
                let Some(root) = self.plan.roots.get(index) else {
                    continue;
                };
                self.fail_root(
                    index,
                    ComposeError::RequiredResourceFailed {
                        id: id.clone(),
                        root: root.clone(),
                        origin: Some(DirectiveOrigin {
                            document: parent.clone(),
                            position: edge.position,
                        }),
                        reason: err.to_string(),
                    },
                );
            }
        }
    }

    fn fail_root(&self, index: usize, err: ComposeError) {
        {
            let mut failures = match self.root_failures.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let Some(slot) = failures.get_mut(index) else {
                return;
            };
            if slot.is_some() {
                return;
            }
            warn!(target: "render", "{err}");
            *slot = Some(err);
        }
        if let Some(flag) = self.root_cancelled.get(index) {
            flag.store(true, Ordering::SeqCst);
        }
        self.cancel.notify_waiters();
    }

    fn finish(&self) -> RenderRun {
        let root_failures = match self.root_failures.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        RenderRun {
            artifacts: self
                .artifacts
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
            states: self.states.iter().map(|r| (r.key().clone(), *r.value())).collect(),
            failures: self.failures.iter().map(|r| (r.key().clone(), r.value().clone())).collect(),
            notes: self.notes.iter().map(|r| (r.key().clone(), r.value().clone())).collect(),
            root_failures,
            rendered: self.rendered.iter().map(|r| r.key().clone()).collect(),
            renderer_invocations: self.invocations.load(Ordering::SeqCst),
        }
    }
}
