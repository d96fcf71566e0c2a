//! Rendering: the renderer seam, the built-in renderers, the orchestrator
//! that runs a workplan, and the assembly of composed documents.
//!
//! A renderer turns one resource into a [`Fragment`]. Fragments of documents
//! contain slots where their directives were; slots are filled during
//! assembly from the fragments of the referenced nodes, so a cached parent
//! fragment stays valid when only a child changes.
//!
//! Renderers are looked up by [`ResourceKind`] in a [`RendererRegistry`].
//! Every kind has a built-in renderer; callers replace any of them with
//! [`RendererRegistry::register`].

mod assemble;
mod builtin;
mod fragment;
mod orchestrator;

pub use assemble::{ArtifactSource, Assembler, ComposedDocument};
pub use builtin::{
    AiRenderer, AudioRenderer, DocumentRenderer, HtmlRenderer, ImageRenderer, TableRenderer,
};
pub use fragment::{Fragment, FragmentPart};
pub use orchestrator::{NodeState, Orchestrator, RenderProgress, RenderRun};

use crate::core::{AiTask, DirectiveKind, ResourceKind};
use crate::diagnostics::Diagnostic;
use crate::identity::ResourceId;
use crate::markdown::{DirectiveOptions, DocumentParser};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Composed text of a source, passed to derived renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedInput {
    pub id: ResourceId,
    pub content: String,
}

/// Everything a renderer gets for one node.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Raw content. Empty for derived resources.
    pub content: Arc<[u8]>,
    /// State inherited from the parent document.
    pub state: Arc<Value>,
    pub options: DirectiveOptions,
    pub directive_kind: Option<DirectiveKind>,
    /// Composed sources, for derived resources.
    pub inputs: Vec<ComposedInput>,
}

impl RenderRequest {
    /// Content as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// What a renderer produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutput {
    pub fragment: Fragment,
    /// Notes about the input, attached to every document that includes it.
    pub notes: Vec<Diagnostic>,
}

impl RenderOutput {
    #[must_use]
    pub fn new(fragment: Fragment) -> Self {
        Self {
            fragment,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: Diagnostic) -> Self {
        self.notes.push(note);
        self
    }
}

/// Renders resources of one kind.
///
/// Renderers must be idempotent: the same request yields the same output.
/// The engine relies on this to serve cached fragments.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> anyhow::Result<RenderOutput>;
}

/// Input of an AI task.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub task: AiTask,
    pub inputs: Vec<ComposedInput>,
    pub options: DirectiveOptions,
}

/// Produces text for AI-derived resources.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn generate(&self, request: &AiRequest) -> anyhow::Result<String>;
}

/// Renderers by resource kind.
#[derive(Clone)]
pub struct RendererRegistry {
    renderers: HashMap<ResourceKind, Arc<dyn Renderer>>,
}

impl RendererRegistry {
    /// Registry with the built-in renderer for every kind.
    ///
    /// Without an AI provider, derived resources fail to render.
    pub fn with_defaults(
        parser: Arc<dyn DocumentParser>,
        ai: Option<Arc<dyn AiProvider>>,
    ) -> Self {
        let mut registry = Self {
            renderers: HashMap::new(),
        };
        registry.register(ResourceKind::Document, Arc::new(DocumentRenderer::new(parser)));
        registry.register(ResourceKind::Html, Arc::new(HtmlRenderer));
        registry.register(ResourceKind::Image, Arc::new(ImageRenderer));
        registry.register(ResourceKind::Audio, Arc::new(AudioRenderer));
        registry.register(ResourceKind::TableData, Arc::new(TableRenderer));

        let ai_renderer: Arc<dyn Renderer> = Arc::new(AiRenderer::new(ai));
        for task in [AiTask::Summary, AiTask::Consolidation, AiTask::Topic, AiTask::Embedding] {
            registry.register(ResourceKind::Ai(task), ai_renderer.clone());
        }
        registry
    }

    /// Sets the renderer for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: ResourceKind, renderer: Arc<dyn Renderer>) {
        self.renderers.insert(kind, renderer);
    }

    #[must_use]
    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn Renderer>> {
        self.renderers.get(&kind).cloned()
    }
}

impl fmt::Debug for RendererRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.renderers.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("RendererRegistry").field("kinds", &kinds).finish()
    }
}
